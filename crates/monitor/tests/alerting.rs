use monitor::{
    spawn_alert_loop, spawn_alert_loop_with_probe, AlertConfig, AlertHandler, AlertLevel, AlertManager, AlertType, Monitor,
    MonitorConfig, WebhookAlertHandler,
};
use provider::{CircuitState, ProviderKind};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts HTTP posts, records JSON bodies and answers with `status`.
async fn webhook_sink(status: u16) -> (String, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&bodies);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                if let Ok(body) = serde_json::from_slice::<Value>(&buf[header_end..]) {
                    recorded.lock().unwrap().push(body);
                }
                let response = format!(
                    "HTTP/1.1 {status} STUB\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/alerts"), bodies)
}

fn over_budget_monitor() -> Arc<Monitor> {
    let monitor = Arc::new(Monitor::new(MonitorConfig {
        daily_budget_usd: 10.0,
        ..MonitorConfig::default()
    }));
    monitor.record_embedding(ProviderKind::Remote, Duration::from_millis(80), 480_000, 9.6, 10);
    monitor
}

#[tokio::test]
async fn webhook_receives_alert_json() {
    let (url, bodies) = webhook_sink(200).await;
    let handler = WebhookAlertHandler::new(url).unwrap();
    let manager = AlertManager::new(AlertConfig::default());
    manager.add_handler(Arc::new(handler));

    let fired = manager.check(&over_budget_monitor().snapshot()).await;
    assert_eq!(fired.len(), 1);

    let bodies = bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["level"], "critical");
    assert_eq!(bodies[0]["alert_type"], "budget_utilization");
    assert_eq!(bodies[0]["threshold"], 0.95);
}

#[tokio::test]
async fn webhook_error_status_is_reported_to_caller() {
    let (url, _) = webhook_sink(500).await;
    let handler = WebhookAlertHandler::new(url).unwrap();
    let alert = AlertManager::new(AlertConfig::default())
        .evaluate(&over_budget_monitor().snapshot())
        .remove(0);
    let err = handler.handle(&alert).await.unwrap_err();
    assert_eq!(err, monitor::AlertError::WebhookStatus { status: 500 });
}

#[tokio::test]
async fn background_loop_fires_once_within_cooldown() {
    let monitor = over_budget_monitor();
    let manager = Arc::new(AlertManager::new(AlertConfig::default()));

    let task = spawn_alert_loop(monitor, Arc::clone(&manager), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(120)).await;
    task.abort();

    let history = manager.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].level, AlertLevel::Critical);
    assert_eq!(history[0].alert_type, AlertType::BudgetUtilization);
}

#[tokio::test]
async fn probe_refreshes_circuit_state_before_each_check() {
    let monitor = Arc::new(Monitor::default());
    monitor.record_circuit_state(ProviderKind::Remote, CircuitState::Open);
    let manager = Arc::new(AlertManager::new(AlertConfig::default()));

    let probed = Arc::clone(&monitor);
    let task = spawn_alert_loop_with_probe(
        Arc::clone(&monitor),
        Arc::clone(&manager),
        Duration::from_millis(10),
        move || {
            let monitor = Arc::clone(&probed);
            async move { monitor.record_circuit_state(ProviderKind::Remote, CircuitState::Closed) }
        },
    );
    tokio::time::sleep(Duration::from_millis(80)).await;
    task.abort();

    assert_eq!(
        monitor.snapshot().health.circuits.get(&ProviderKind::Remote),
        Some(&CircuitState::Closed)
    );
    assert!(manager
        .history()
        .iter()
        .all(|a| a.alert_type != AlertType::CircuitBreakerOpen));
}
