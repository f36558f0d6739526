use std::time::Duration;

use davprobe_core::{DavClient, DavError};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::channel::{ChannelState, Credentials, PushChannel};
use crate::config::ProbeConfig;
use crate::correlate::notification_matches;
use crate::report::{ChannelCheck, Report, StepResult};
use crate::suite::{normalize_dir, run_suite};

const WRITE_OK: &[u16] = &[200, 201, 204];

/// Drives the three check-runs in order and aggregates their outcomes.
/// Every fault is recorded in the report; nothing here retries or aborts.
pub struct Orchestrator {
    config: ProbeConfig,
    dav: DavClient,
}

impl Orchestrator {
    pub fn new(config: ProbeConfig) -> Result<Self, DavError> {
        let dav = DavClient::new(&config.http_url, &config.username, &config.password)?;
        Ok(Self { config, dav })
    }

    pub async fn run(&self) -> Report {
        let channel = self.channel_check().await;
        let suite = run_suite(&self.dav, self.config.test_dir.as_deref(), self.config.debug).await;
        let file_name = format!("combined_{}.txt", random_id());
        let combined = self.combined_check(&file_name).await;
        Report {
            channel,
            suite,
            combined,
        }
    }

    /// Pure channel check: one connection subscribed to the root, judged on
    /// whether the full handshake lands within the short window.
    async fn channel_check(&self) -> ChannelCheck {
        let channel = PushChannel::open(
            self.config.ws_url.clone(),
            self.credentials(),
            "/".to_string(),
            self.config.debug,
        );
        let window = self.config.timeout.min(Duration::from_secs(5));
        let passed = channel
            .wait_until(window, |state, _| state == ChannelState::Subscribed)
            .await;
        let messages = channel.messages();
        channel.close().await;
        ChannelCheck { passed, messages }
    }

    /// Combined check: mutate a uniquely named resource while subscribed to
    /// its directory and correlate the resulting notification. Four steps,
    /// recorded individually; cleanup is best-effort.
    async fn combined_check(&self, file_name: &str) -> Vec<StepResult> {
        let mut results = Vec::new();

        let subscribe_path = self
            .config
            .test_dir
            .as_deref()
            .map(normalize_dir)
            .unwrap_or_else(|| "/".to_string());
        let file_path = format!("{subscribe_path}{file_name}");

        let write_ok = match self
            .dav
            .put(&file_path, initial_content(file_name))
            .await
        {
            Ok(status) if WRITE_OK.contains(&status.as_u16()) => {
                results.push(StepResult::passed(
                    "dav_write",
                    format!("created {file_path}, status {}", status.as_u16()),
                ));
                true
            }
            Ok(status) => {
                results.push(StepResult::failed(
                    "dav_write",
                    format!("status {}", status.as_u16()),
                ));
                false
            }
            Err(err) => {
                results.push(StepResult::failed("dav_write", err.to_string()));
                false
            }
        };

        let channel = PushChannel::open(
            self.config.ws_url.clone(),
            self.credentials(),
            subscribe_path.clone(),
            self.config.debug,
        );
        let subscribe_window = (self.config.timeout / 3).min(Duration::from_secs(4));
        let subscribed = channel
            .wait_until(subscribe_window, |state, _| {
                state == ChannelState::Subscribed
            })
            .await;
        results.push(if subscribed {
            StepResult::passed(
                "channel_subscribe",
                format!("subscribed to {subscribe_path}"),
            )
        } else {
            StepResult::failed(
                "channel_subscribe",
                format!(
                    "channel did not reach subscribed (state {:?})",
                    channel.state()
                ),
            )
        });

        let modify_ok = if write_ok {
            match self.dav.put(&file_path, updated_content(file_name)).await {
                Ok(status) if WRITE_OK.contains(&status.as_u16()) => {
                    results.push(StepResult::passed(
                        "dav_modify",
                        format!("updated {file_path}, status {}", status.as_u16()),
                    ));
                    true
                }
                Ok(status) => {
                    results.push(StepResult::failed(
                        "dav_modify",
                        format!("status {}", status.as_u16()),
                    ));
                    false
                }
                Err(err) => {
                    results.push(StepResult::failed("dav_modify", err.to_string()));
                    false
                }
            }
        } else {
            results.push(StepResult::skipped(
                "dav_modify",
                "skipped: initial write failed",
            ));
            false
        };

        if modify_ok {
            // Give the notification a fair chance to arrive; the wait ends
            // as soon as a correlating entry shows up.
            let notify_window = (self.config.timeout / 2).min(Duration::from_secs(5));
            channel
                .wait_until(notify_window, |_, log| {
                    notification_matches(&file_path, log)
                })
                .await;
        }

        if subscribed {
            let log = channel.messages();
            results.push(if notification_matches(&file_path, &log) {
                StepResult::passed(
                    "change_notification",
                    format!("received matching fileChange for {file_path}"),
                )
            } else {
                StepResult::failed(
                    "change_notification",
                    format!("no matching fileChange among {} messages", log.len()),
                )
            });
        } else {
            results.push(StepResult::skipped(
                "change_notification",
                "skipped: channel never subscribed",
            ));
        }

        // Cleanup is best-effort; the check has already been judged.
        let _ = self.dav.delete(&file_path).await;
        channel.close().await;

        results
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        }
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn initial_content(file_name: &str) -> Vec<u8> {
    format!("combined check initial content for {file_name}\n").into_bytes()
}

fn updated_content(file_name: &str) -> Vec<u8> {
    format!("combined check updated content for {file_name}\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StepOutcome;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(http_url: String, ws_url: String, test_dir: Option<&str>) -> ProbeConfig {
        ProbeConfig {
            http_url,
            ws_url,
            username: "probe".into(),
            password: "secret".into(),
            test_dir: test_dir.map(String::from),
            timeout: Duration::from_secs(6),
            debug: false,
        }
    }

    /// Conforming push endpoint: answers the handshake, emits one
    /// `fileChange` for `notify_path` if given, then waits for the client
    /// to close.
    async fn spawn_push_server(notify_path: Option<String>) -> (String, JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let auth: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(raw) => serde_json::from_str(&raw).unwrap(),
                other => panic!("expected authenticate, got {other:?}"),
            };
            assert_eq!(auth["type"], "authenticate");
            ws.send(Message::Text(json!({"type": "auth_success"}).to_string()))
                .await
                .unwrap();

            let subscribe: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(raw) => serde_json::from_str(&raw).unwrap(),
                other => panic!("expected subscribe, got {other:?}"),
            };
            assert_eq!(subscribe["type"], "subscribe");
            ws.send(Message::Text(
                json!({"type": "subscriptionConfirmed"}).to_string(),
            ))
            .await
            .unwrap();

            if let Some(path) = notify_path {
                ws.send(Message::Text(
                    json!({
                        "type": "fileChange",
                        "path": path,
                        "eventType": "updated"
                    })
                    .to_string(),
                ))
                .await
                .unwrap();
            }

            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
            subscribe
        });
        (ws_url, handle)
    }

    fn dead_ws_url() -> String {
        // Reserve a port and release it again so nothing listens there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[tokio::test]
    async fn channel_check_passes_with_conforming_server() {
        let (ws_url, server) = spawn_push_server(None).await;
        let orchestrator =
            Orchestrator::new(config("http://127.0.0.1:9".into(), ws_url, None)).unwrap();

        let check = orchestrator.channel_check().await;
        assert!(check.passed);
        assert!(check
            .messages
            .contains(&crate::channel::ChannelMessage::SubscriptionConfirmed));

        let subscribe = server.await.unwrap();
        assert_eq!(subscribe["path"], "/");
    }

    #[tokio::test]
    async fn channel_check_fails_but_still_reports_messages() {
        let orchestrator =
            Orchestrator::new(config("http://127.0.0.1:9".into(), dead_ws_url(), None)).unwrap();

        let check = orchestrator.channel_check().await;
        assert!(!check.passed);
        assert!(check.messages.is_empty());
    }

    #[tokio::test]
    async fn combined_check_passes_end_to_end() {
        let http = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/itest/combined_known.txt"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&http)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/itest/combined_known.txt"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&http)
            .await;

        let (ws_url, server) =
            spawn_push_server(Some("/itest/combined_known.txt".into())).await;
        let orchestrator =
            Orchestrator::new(config(http.uri(), ws_url, Some("/itest/"))).unwrap();

        let results = orchestrator.combined_check("combined_known.txt").await;

        let outcomes: Vec<_> = results.iter().map(|step| (step.name, step.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                ("dav_write", StepOutcome::Passed),
                ("channel_subscribe", StepOutcome::Passed),
                ("dav_modify", StepOutcome::Passed),
                ("change_notification", StepOutcome::Passed),
            ]
        );

        let subscribe = server.await.unwrap();
        assert_eq!(subscribe["path"], "/itest/");
    }

    #[tokio::test]
    async fn combined_write_failure_skips_modify() {
        let http = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&http)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&http)
            .await;

        let (ws_url, server) = spawn_push_server(None).await;
        let orchestrator =
            Orchestrator::new(config(http.uri(), ws_url, Some("/itest/"))).unwrap();

        let results = orchestrator.combined_check("combined_known.txt").await;

        let by_name = |name: &str| results.iter().find(|step| step.name == name).unwrap();
        assert_eq!(by_name("dav_write").outcome, StepOutcome::Failed);
        assert_eq!(by_name("channel_subscribe").outcome, StepOutcome::Passed);
        assert_eq!(by_name("dav_modify").outcome, StepOutcome::Skipped);
        // Channel worked, so the notification step is judged, and no
        // mutation went through: a real failure, not a skip.
        assert_eq!(by_name("change_notification").outcome, StepOutcome::Failed);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn combined_channel_failure_skips_notification() {
        let http = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&http)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&http)
            .await;

        let orchestrator =
            Orchestrator::new(config(http.uri(), dead_ws_url(), Some("/itest/"))).unwrap();

        let results = orchestrator.combined_check("combined_known.txt").await;

        let by_name = |name: &str| results.iter().find(|step| step.name == name).unwrap();
        assert_eq!(by_name("dav_write").outcome, StepOutcome::Passed);
        assert_eq!(by_name("channel_subscribe").outcome, StepOutcome::Failed);
        assert_eq!(by_name("dav_modify").outcome, StepOutcome::Passed);
        assert_eq!(by_name("change_notification").outcome, StepOutcome::Skipped);
    }

    #[test]
    fn random_id_is_eight_lowercase_alphanumerics() {
        let id = random_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
