//! Quick start example for SieveDB.
//!
//! Builds a small synthetic user table, runs a few boolean queries and a
//! grouped top-K. Set `RUST_LOG=sievedb_core=debug` to watch set upgrades.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sievedb::prelude::*;
use tracing_subscriber::EnvFilter;

const USERS: u32 = 50_000;
const CITIES: &[&str] = &["Rome", "Oslo", "Lima", "Kyiv", "Pune", "Hanoi"];
const INTERESTS: &[&str] = &["chess", "golf", "tennis", "sailing", "jazz"];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let index = Index::new();
    let mut rng = StdRng::seed_from_u64(2018);

    println!("Indexing {} users...", USERS);
    for uid in 1..=USERS {
        let city = if rng.gen_bool(0.05) {
            ""
        } else {
            CITIES[rng.gen_range(0..CITIES.len())]
        };
        index.insert(uid, "city", city)?;
        index.insert(uid, "status", if rng.gen_bool(0.4) { "single" } else { "taken" })?;
        for interest in INTERESTS {
            if rng.gen_bool(0.2) {
                index.insert(uid, "interest", interest)?;
            }
        }
    }
    println!("{:?}\n", index);

    let query = Query::eq("status", "single")
        .and(Query::any_of("interest", ["chess", "jazz"]))
        .and(Query::not_null("city"));
    println!("Query: {}", serde_json::to_string(&query).unwrap_or_default());
    println!("  matches: {}", index.count(&query)?);
    println!("  latest 5: {:?}\n", index.select(&query, 5)?);

    // Which cities have the most single chess or jazz fans?
    let cities = index
        .dictionary("city")
        .ok_or_else(|| Error::InvalidConfig("city attribute missing".into()))?;
    let city_sets: Vec<_> = cities
        .values()
        .into_iter()
        .filter_map(|(id, _)| cities.get_bitset(id).map(|b| (id, b)))
        .collect();

    let group = GroupQuery::new(3).with_expected_groups(CITIES.len());
    let top = index.group_top_k(
        &query,
        &group,
        |uid| {
            city_sets
                .iter()
                .find(|(_, set)| set.contains(uid))
                .map(|(id, _)| (id.get(), 1.0))
        },
        |a, b| a > b,
    )?;

    println!("Top cities:");
    println!("{:-<40}", "");
    for (rank, entry) in top.iter().enumerate() {
        let name = ValueId::new(entry.uid)
            .and_then(|id| cities.value(id))
            .unwrap_or_default();
        println!("  {}. {:<8} {:>6}", rank + 1, name, entry.score);
    }
    println!("{:-<40}", "");

    Ok(())
}
