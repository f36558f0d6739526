use std::time::Duration;

use anyhow::Context;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WS_PATH: &str = "/ws";

/// Raw configuration surface: environment first, CLI flags override.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub test_dir: Option<String>,
    pub timeout_secs: Option<u64>,
    pub debug: bool,
    pub ws_path: Option<String>,
    pub help: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            url: read_env("DAVPROBE_URL"),
            username: read_env("DAVPROBE_USERNAME"),
            password: read_env("DAVPROBE_PASSWORD"),
            port: read_env("DAVPROBE_PORT").and_then(|value| value.parse().ok()),
            test_dir: read_env("DAVPROBE_TEST_DIR"),
            timeout_secs: read_env("DAVPROBE_TIMEOUT_SECS").and_then(|value| value.parse().ok()),
            debug: read_bool_env("DAVPROBE_DEBUG"),
            ws_path: read_env("DAVPROBE_WS_PATH"),
            help: false,
        }
    }

    /// Apply command-line flags on top. The first element of `args` is the
    /// program name and is skipped.
    pub fn apply_args<I>(mut self, args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--url" | "-u" => self.url = Some(expect_value(&arg, args.next())?),
                "--username" | "-n" => self.username = Some(expect_value(&arg, args.next())?),
                "--password" | "-p" => self.password = Some(expect_value(&arg, args.next())?),
                "--port" => {
                    let value = expect_value(&arg, args.next())?;
                    self.port = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid port: {value}"))?,
                    );
                }
                "--test-dir" | "-d" => self.test_dir = Some(expect_value(&arg, args.next())?),
                "--timeout" => {
                    let value = expect_value(&arg, args.next())?;
                    self.timeout_secs = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid timeout: {value}"))?,
                    );
                }
                "--debug" => self.debug = true,
                "--ws-path" => self.ws_path = Some(expect_value(&arg, args.next())?),
                "--help" | "-h" => self.help = true,
                other => anyhow::bail!("unknown argument: {other}"),
            }
        }
        Ok(self)
    }

    pub fn into_config(self) -> anyhow::Result<ProbeConfig> {
        let host = self
            .url
            .context("server address is required (--url or DAVPROBE_URL)")?;
        let username = self
            .username
            .context("username is required (--username or DAVPROBE_USERNAME)")?;
        let password = self
            .password
            .context("password is required (--password or DAVPROBE_PASSWORD)")?;

        let port = self.port.unwrap_or(DEFAULT_PORT);
        let authority = if host_has_port(&host) {
            host
        } else {
            format!("{host}:{port}")
        };
        let ws_path = self.ws_path.unwrap_or_else(|| DEFAULT_WS_PATH.to_string());
        let test_dir = self.test_dir.filter(|dir| !dir.is_empty());

        Ok(ProbeConfig {
            http_url: format!("http://{authority}"),
            ws_url: format!("ws://{authority}{ws_path}"),
            username,
            password,
            test_dir,
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            debug: self.debug,
        })
    }
}

/// Fully resolved configuration, threaded explicitly into the orchestrator.
/// Nothing below this point reads the environment.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub http_url: String,
    pub ws_url: String,
    pub username: String,
    pub password: String,
    pub test_dir: Option<String>,
    pub timeout: Duration,
    pub debug: bool,
}

// The host may already carry an explicit port; only then is the configured
// port ignored. Mirrors a ":<digits>" suffix check, so bare IPv6 literals
// are not special-cased.
fn host_has_port(host: &str) -> bool {
    match host.rsplit_once(':') {
        Some((_, suffix)) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn read_bool_env(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn expect_value(flag: &str, value: Option<String>) -> anyhow::Result<String> {
    value.with_context(|| format!("{flag} requires a value"))
}

pub fn usage() -> &'static str {
    "Usage: davprobe --url HOST --username USER --password PASS [options]\n\
     \n\
     Options:\n\
       -u, --url HOST        server host, with or without :port\n\
       -n, --username USER   account name for basic auth and the push channel\n\
       -p, --password PASS   account secret\n\
           --port PORT       server port when HOST has none (default: 3000)\n\
       -d, --test-dir DIR    use an existing directory instead of a fresh one\n\
           --timeout SECS    overall wait budget (default: 30)\n\
           --debug           print every received channel frame\n\
           --ws-path PATH    push channel endpoint path (default: /ws)\n\
       -h, --help            show this message\n\
     \n\
     Environment fallbacks: DAVPROBE_URL, DAVPROBE_USERNAME, DAVPROBE_PASSWORD,\n\
     DAVPROBE_PORT, DAVPROBE_TEST_DIR, DAVPROBE_TIMEOUT_SECS, DAVPROBE_DEBUG,\n\
     DAVPROBE_WS_PATH."
}
