//! Walk one ride from request to settlement against a throwaway sled store.
//!
//! `cargo run --example dispatch_walkthrough`, with `RUST_LOG=ride_dispatch=debug`
//! to see every publish.

use anyhow::Context;
use ride_dispatch::{
    DispatchService, Identity, Location, RideStatus,
    auth::{Authenticator, TokenTable},
    config::DispatchConfig,
    logging,
    presence::Connection,
    ride::Coordinate,
};

fn print_inbox(who: &str, connection: &mut Connection) -> anyhow::Result<()> {
    while let Ok(delivery) = connection.inbox.try_recv() {
        println!("{who:>8} <- {}", delivery.to_json()?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let scratch = std::env::temp_dir().join(format!("dispatch-demo-{}", std::process::id()));
    let config = DispatchConfig::from_env().with_db_path(&scratch);
    logging::init(&config.log_filter)?;

    let service = DispatchService::open(&config).context("failed to open ride store")?;

    let tokens = TokenTable::new();
    tokens.issue("rider-token", Identity::rider("rider_ana"));
    tokens.issue("driver-token-1", Identity::driver("driver_ben"));
    tokens.issue("driver-token-2", Identity::driver("driver_cat"));

    let rider = tokens.authenticate("rider-token")?;
    let ben = tokens.authenticate("driver-token-1")?;
    let cat = tokens.authenticate("driver-token-2")?;

    let mut rider_conn = service.connect(&rider)?;
    let mut ben_conn = service.connect(&ben)?;
    let mut cat_conn = service.connect(&cat)?;
    service.subscribe(&ben_conn.id, "drivers-listening")?;
    service.subscribe(&cat_conn.id, "drivers-listening")?;

    let ride = service.request_ride(
        &rider,
        Location::new("Shibuya Crossing", 35.6595, 139.7005),
        Location::new("Tokyo Tower", 35.6586, 139.7454),
    )?;
    println!("requested {} for {}", ride.id, ride.estimated_fare);
    print_inbox("ben", &mut ben_conn)?;
    print_inbox("cat", &mut cat_conn)?;

    let ride = service.claim_ride(&ride.id, &ben)?;
    match service.claim_ride(&ride.id, &cat) {
        Ok(_) => anyhow::bail!("two drivers claimed the same ride"),
        Err(e) => println!("cat lost the race: {e}"),
    }
    print_inbox("rider", &mut rider_conn)?;

    let channel = format!("ride:{}", ride.id);
    service.subscribe(&rider_conn.id, &channel)?;
    service.subscribe(&ben_conn.id, &channel)?;

    service.set_status(&ride.id, RideStatus::InProgress, &ben)?;
    service.update_location(&ride.id, &ben, Coordinate::new(35.6590, 139.7200))?;
    let ride = service.set_status(&ride.id, RideStatus::Completed, &ben)?;
    print_inbox("rider", &mut rider_conn)?;

    let settled = service.record_settlement(&ride.id, ride.final_fare.unwrap_or_default())?;
    print_inbox("rider", &mut rider_conn)?;
    print_inbox("ben", &mut ben_conn)?;
    println!("settled {} at {}", settled.id, settled.final_fare.unwrap_or_default());

    drop(service);
    std::fs::remove_dir_all(&scratch).ok();
    Ok(())
}
