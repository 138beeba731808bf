use chrono::{DateTime, TimeZone, Utc};
use fleet_guardian::config::ForecastConfig;
use fleet_guardian::error::{Error, Result};
use fleet_guardian::fleet::LoadForecaster;
use fleet_guardian::server::{ServerDraft, ServerId};
use fleet_guardian::{FleetController, LoadSample};

/// Ten minutes past the hour, `hours_ago` hours back
fn hours_ago(hours_ago: i64) -> DateTime<Utc> {
    let this_hour = Utc::now().timestamp().div_euclid(3600) * 3600;
    Utc.timestamp_opt(this_hour - hours_ago * 3600 + 600, 0).unwrap()
}

fn controller_with_history(hourly: &[u64]) -> (FleetController, ServerId) {
    let controller = FleetController::from_config_str("{}").unwrap();
    let server = controller
        .create_server(
            ServerDraft {
                name: "lon-1".to_string(),
                ip_address: "192.0.2.44".to_string(),
                capacity: 50,
                protocols: vec!["vless".to_string()],
                ..Default::default()
            },
            "ops",
        )
        .unwrap();

    let n = hourly.len() as i64;
    for (i, connections) in hourly.iter().enumerate() {
        controller
            .record_load_sample(
                server.id,
                LoadSample {
                    timestamp: hours_ago(n - 1 - i as i64),
                    active_connections: *connections,
                },
            )
            .unwrap();
    }
    (controller, server.id)
}

#[test]
fn test_flat_history_predicts_flat_load() -> Result<()> {
    let (controller, id) = controller_with_history(&[40, 40, 40, 40]);

    let predictions = controller.get_load_prediction(id, None)?;

    assert_eq!(predictions.len(), 8);
    assert_eq!(predictions[0].hour_offset, 1);
    assert_eq!(predictions[7].hour_offset, 8);
    for p in &predictions {
        assert!((p.predicted_load - 40.0).abs() < 1e-9);
    }

    Ok(())
}

#[test]
fn test_rising_trend_is_extrapolated() -> Result<()> {
    let (controller, id) = controller_with_history(&[10, 20, 30, 40]);

    let predictions = controller.get_load_prediction(id, Some(3))?;

    // Smoothed level 31.25, slope 10 per hour
    let loads: Vec<f64> = predictions.iter().map(|p| p.predicted_load).collect();
    assert_eq!(loads, vec![41.25, 51.25, 61.25]);

    // Not capped at capacity
    assert!(loads[2] > 50.0);

    Ok(())
}

#[test]
fn test_prediction_never_negative() -> Result<()> {
    let (controller, id) = controller_with_history(&[40, 30, 20, 10]);

    let predictions = controller.get_load_prediction(id, Some(4))?;
    assert!(predictions.iter().all(|p| p.predicted_load >= 0.0));
    assert_eq!(predictions[3].predicted_load, 0.0);

    Ok(())
}

#[test]
fn test_prediction_is_deterministic() -> Result<()> {
    let (controller, id) = controller_with_history(&[12, 18, 9, 30, 22]);

    let first = controller.get_load_prediction(id, Some(24))?;
    let second = controller.get_load_prediction(id, Some(24))?;
    assert_eq!(first, second);

    Ok(())
}

#[test]
fn test_short_history_predicts_nothing() -> Result<()> {
    let (controller, id) = controller_with_history(&[10, 20]);
    assert!(controller.get_load_prediction(id, None)?.is_empty());

    let (controller, id) = controller_with_history(&[]);
    assert!(controller.get_load_prediction(id, None)?.is_empty());

    Ok(())
}

#[test]
fn test_horizon_out_of_range() {
    let (controller, id) = controller_with_history(&[10, 20, 30]);

    for horizon in [0, 169] {
        match controller.get_load_prediction(id, Some(horizon)) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "horizon_hours"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
    assert_eq!(controller.get_load_prediction(id, Some(168)).unwrap().len(), 168);
}

#[tokio::test]
async fn test_reported_connections_feed_history() -> Result<()> {
    let (controller, id) = controller_with_history(&[]);
    for hours in [2, 1] {
        controller.record_load_sample(
            id,
            LoadSample {
                timestamp: hours_ago(hours),
                active_connections: 20,
            },
        )?;
    }
    assert!(controller.get_load_prediction(id, Some(1))?.is_empty());

    // The live report lands in the current hour, completing the minimum history
    controller.report_connections(id, 20).await?;
    let predictions = controller.get_load_prediction(id, Some(1))?;
    assert_eq!(predictions.len(), 1);
    assert!((predictions[0].predicted_load - 20.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_forecaster_min_history_setting() -> Result<()> {
    let forecaster = LoadForecaster::new(ForecastConfig {
        min_history_hours: 5,
        ..Default::default()
    });
    let samples: Vec<LoadSample> = (0..4)
        .map(|i| LoadSample {
            timestamp: hours_ago(4 - i),
            active_connections: 10,
        })
        .collect();

    assert!(forecaster.predict(&samples, 4)?.is_empty());

    Ok(())
}
