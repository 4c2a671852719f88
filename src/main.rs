use std::sync::Arc;

use booking_eng::model::NewEvent;
use booking_eng::payment::MockProvider;
use booking_eng::{Amount, Engine, EngineConfig, Purchaser};
use chrono::{Duration, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo workload: many purchasers race for a small event while the sweeper
/// cleans up abandoned checkouts.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let provider = Arc::new(MockProvider::new(config.provider_key_secret.clone()));
    let engine = Arc::new(Engine::new(provider.clone(), config));

    let event = engine
        .create_event(NewEvent {
            title: "RustConf".to_string(),
            description: "Two days of talks".to_string(),
            location: "Hall A".to_string(),
            starts_at: Utc::now() + Duration::days(30),
            price: Amount::from_float(499.0),
            total_tickets: 25,
        })
        .expect("valid demo event");
    let event_id = event.id;

    {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_sweeper().await });
    }

    let mut handles = Vec::new();
    for i in 0..40u32 {
        let engine = engine.clone();
        let provider = provider.clone();
        handles.push(tokio::spawn(async move {
            let purchaser =
                Purchaser::new(format!("buyer-{i}"), format!("buyer-{i}@example.com"));
            match engine.reserve(event_id, 1, purchaser).await {
                Ok(reservation) => match reservation.checkout {
                    Some(checkout) if i % 5 == 0 => {
                        // Walk away from checkout; the sweep will reclaim it.
                        let _ = checkout;
                        "abandoned"
                    }
                    Some(checkout) => {
                        let payment_ref = format!("pay_{i}");
                        let sig = provider.signature_for(&checkout.order_ref, &payment_ref);
                        match engine.verify_payment(&checkout.order_ref, &payment_ref, &sig) {
                            Ok(_) => "confirmed",
                            Err(_) => "lost",
                        }
                    }
                    None => "confirmed",
                },
                Err(_) => "sold_out",
            }
        }));
    }

    let (mut confirmed, mut abandoned, mut sold_out, mut lost) = (0, 0, 0, 0);
    for handle in handles {
        match handle.await.expect("task panicked") {
            "confirmed" => confirmed += 1,
            "abandoned" => abandoned += 1,
            "sold_out" => sold_out += 1,
            _ => lost += 1,
        }
    }

    let remaining = engine
        .event(event_id)
        .map(|e| e.available_tickets)
        .unwrap_or(0);
    info!(
        confirmed,
        abandoned,
        sold_out,
        lost,
        available = remaining,
        active = engine.active_bookings().len(),
        "demo finished"
    );
}
