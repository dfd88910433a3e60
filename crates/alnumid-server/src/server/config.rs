use alnumid::{MAX_WIDTH, QuotaPolicy, ReconcilePolicy, ResetSchedule, StorageLayout};
use anyhow::{Context, bail};
use clap::Parser;
use std::{fmt, net::SocketAddr, num::NonZeroU32, path::PathBuf, time::Duration};

/// Runtime configuration for the `alnumid-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable; a `.env`
/// file in the working directory is read first. The defaults match a single
/// production deployment issuing at most 200 000 identifiers a day.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "alnumid-server",
    version,
    about = "An HTTP service issuing alphanumeric identifier batches"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:44667"))]
    pub server_addr: String,

    /// Directory holding tracking files, result files, widths, the quota
    /// ledger and the token key.
    ///
    /// Environment variable: `DATA_DIR`
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// CSV catalog of categories and colors with the columns
    /// `SHORT_CATEGORY, ACTUAL_CATEGORY, SHORT_COLOR, ACTUAL_COLOR`.
    ///
    /// Environment variable: `CATALOG_PATH`
    #[arg(long, env = "CATALOG_PATH", default_value = "category_colors.csv")]
    pub catalog_path: PathBuf,

    /// Identifiers that may be issued per quota window.
    ///
    /// Environment variable: `MAX_IDS_PER_WINDOW`
    #[arg(long, env = "MAX_IDS_PER_WINDOW", default_value_t = 200_000)]
    pub max_ids_per_window: u64,

    /// Hour of day (0-23) at which the quota window resets.
    ///
    /// Environment variable: `QUOTA_RESET_HOUR`
    #[arg(long, env = "QUOTA_RESET_HOUR", default_value_t = 13)]
    pub quota_reset_hour: u32,

    /// Minute past the hour at which the quota window resets.
    ///
    /// Environment variable: `QUOTA_RESET_MINUTE`
    #[arg(long, env = "QUOTA_RESET_MINUTE", default_value_t = 0)]
    pub quota_reset_minute: u32,

    /// Offset from UTC, in minutes, of the reset time and of issued dates.
    ///
    /// Environment variable: `QUOTA_UTC_OFFSET_MINUTES`
    #[arg(long, env = "QUOTA_UTC_OFFSET_MINUTES", default_value_t = 330, allow_hyphen_values = true)]
    pub quota_utc_offset_minutes: i32,

    /// Suffix width for keys that have never issued an identifier.
    ///
    /// Environment variable: `DEFAULT_WIDTH`
    #[arg(long, env = "DEFAULT_WIDTH", default_value_t = 6)]
    pub default_width: usize,

    /// Short-link API endpoint, e.g.
    /// `https://firebasedynamiclinks.googleapis.com/v1/shortLinks`.
    ///
    /// Environment variable: `SHORTLINK_ENDPOINT`
    #[arg(long, env = "SHORTLINK_ENDPOINT")]
    pub shortlink_endpoint: String,

    /// API key appended to every short-link request as `?key=`.
    ///
    /// Environment variable: `SHORTLINK_API_KEY`
    #[arg(long, env = "SHORTLINK_API_KEY", hide_env_values = true)]
    pub shortlink_api_key: String,

    /// Domain prefix the short links are issued under.
    ///
    /// Environment variable: `SHORTLINK_DOMAIN_PREFIX`
    #[arg(long, env = "SHORTLINK_DOMAIN_PREFIX")]
    pub shortlink_domain_prefix: String,

    /// Base URL the token is appended to before shortening.
    ///
    /// Environment variable: `SHORTLINK_TARGET_BASE`
    #[arg(long, env = "SHORTLINK_TARGET_BASE")]
    pub shortlink_target_base: String,

    /// Android package name embedded in each link, if any.
    ///
    /// Environment variable: `ANDROID_PACKAGE_NAME`
    #[arg(long, env = "ANDROID_PACKAGE_NAME")]
    pub android_package_name: Option<String>,

    /// iOS bundle id embedded in each link, if any.
    ///
    /// Environment variable: `IOS_BUNDLE_ID`
    #[arg(long, env = "IOS_BUNDLE_ID")]
    pub ios_bundle_id: Option<String>,

    /// Outbound short-link requests per second.
    ///
    /// Environment variable: `SHORTLINK_REQUESTS_PER_SECOND`
    #[arg(long, env = "SHORTLINK_REQUESTS_PER_SECOND", default_value_t = 5)]
    pub shortlink_requests_per_second: u32,

    /// Short-link requests allowed in flight at once.
    ///
    /// Environment variable: `SHORTLINK_CONCURRENCY`
    #[arg(long, env = "SHORTLINK_CONCURRENCY", default_value_t = 8)]
    pub shortlink_concurrency: usize,

    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `SHORTLINK_TIMEOUT_SECS`
    #[arg(long, env = "SHORTLINK_TIMEOUT_SECS", default_value_t = 60)]
    pub shortlink_timeout_secs: u64,

    /// Give up on a run after this many reconciliation passes. Unset retries
    /// until every token resolves.
    ///
    /// Environment variable: `MAX_RESOLUTION_PASSES`
    #[arg(long, env = "MAX_RESOLUTION_PASSES")]
    pub max_resolution_passes: Option<u32>,

    /// Pause after a reconciliation pass that resolved nothing, in
    /// milliseconds.
    ///
    /// Environment variable: `STALL_BACKOFF_MS`
    #[arg(long, env = "STALL_BACKOFF_MS", default_value_t = 5_000)]
    pub stall_backoff_ms: u64,
}

/// Settings of the outbound short-link client.
#[derive(Clone)]
pub struct ShortLinkConfig {
    pub endpoint: String,
    pub api_key: String,
    pub domain_prefix: String,
    pub target_base: String,
    pub android_package_name: Option<String>,
    pub ios_bundle_id: Option<String>,
    pub requests_per_second: NonZeroU32,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl fmt::Debug for ShortLinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShortLinkConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("domain_prefix", &self.domain_prefix)
            .field("target_base", &self.target_base)
            .field("android_package_name", &self.android_package_name)
            .field("ios_bundle_id", &self.ios_bundle_id)
            .field("requests_per_second", &self.requests_per_second)
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub catalog_path: PathBuf,
    pub layout: StorageLayout,
    pub default_width: usize,
    pub quota: QuotaPolicy,
    pub reconcile: ReconcilePolicy,
    pub shortlink: ShortLinkConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR {:?} is not a socket address", args.server_addr))?;

        if args.max_ids_per_window == 0 {
            bail!("MAX_IDS_PER_WINDOW must be greater than 0");
        }
        if args.default_width == 0 || args.default_width > MAX_WIDTH {
            bail!("DEFAULT_WIDTH must be between 1 and {MAX_WIDTH}");
        }
        if args.quota_utc_offset_minutes.unsigned_abs() >= 18 * 60 {
            bail!("QUOTA_UTC_OFFSET_MINUTES must be within ±18 hours");
        }
        let Some(schedule) = ResetSchedule::new(
            args.quota_reset_hour,
            args.quota_reset_minute,
            args.quota_utc_offset_minutes,
        ) else {
            bail!(
                "quota reset time {}:{:02} is not a valid time of day",
                args.quota_reset_hour,
                args.quota_reset_minute
            );
        };

        let Some(requests_per_second) = NonZeroU32::new(args.shortlink_requests_per_second) else {
            bail!("SHORTLINK_REQUESTS_PER_SECOND must be greater than 0");
        };
        if args.shortlink_concurrency == 0 {
            bail!("SHORTLINK_CONCURRENCY must be greater than 0");
        }
        if args.shortlink_timeout_secs == 0 {
            bail!("SHORTLINK_TIMEOUT_SECS must be greater than 0");
        }
        if args.max_resolution_passes == Some(0) {
            bail!("MAX_RESOLUTION_PASSES must be greater than 0 when set");
        }
        for (name, value) in [
            ("SHORTLINK_ENDPOINT", &args.shortlink_endpoint),
            ("SHORTLINK_DOMAIN_PREFIX", &args.shortlink_domain_prefix),
            ("SHORTLINK_TARGET_BASE", &args.shortlink_target_base),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }

        Ok(Self {
            server_addr,
            catalog_path: args.catalog_path,
            layout: StorageLayout::under(&args.data_dir),
            default_width: args.default_width,
            quota: QuotaPolicy {
                max_ids: args.max_ids_per_window,
                schedule,
            },
            reconcile: ReconcilePolicy {
                max_passes: args.max_resolution_passes,
                stall_backoff: Duration::from_millis(args.stall_backoff_ms),
            },
            shortlink: ShortLinkConfig {
                endpoint: args.shortlink_endpoint,
                api_key: args.shortlink_api_key,
                domain_prefix: args.shortlink_domain_prefix,
                target_base: args.shortlink_target_base.trim_end_matches('/').to_owned(),
                android_package_name: args.android_package_name,
                ios_bundle_id: args.ios_bundle_id,
                requests_per_second,
                concurrency: args.shortlink_concurrency,
                timeout: Duration::from_secs(args.shortlink_timeout_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec![
            "alnumid-server",
            "--shortlink-endpoint",
            "https://links.example/v1/shortLinks",
            "--shortlink-api-key",
            "k",
            "--shortlink-domain-prefix",
            "https://go.example",
            "--shortlink-target-base",
            "https://app.example/scan/",
        ];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_deployment() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 44667);
        assert_eq!(config.quota.max_ids, 200_000);
        assert_eq!(config.quota.schedule, ResetSchedule::default());
        assert_eq!(config.default_width, 6);
        assert_eq!(config.shortlink.requests_per_second.get(), 5);
        assert_eq!(config.shortlink.timeout, Duration::from_secs(60));
        assert_eq!(config.shortlink.target_base, "https://app.example/scan");
        assert_eq!(config.reconcile.max_passes, None);
    }

    #[test]
    fn rejects_out_of_range_values() {
        for extra in [
            &["--default-width", "0"][..],
            &["--default-width", "25"],
            &["--max-ids-per-window", "0"],
            &["--quota-reset-hour", "24"],
            &["--quota-reset-minute", "60"],
            &["--quota-utc-offset-minutes", "1200"],
            &["--quota-utc-offset-minutes", "-2147483648"],
            &["--shortlink-requests-per-second", "0"],
            &["--max-resolution-passes", "0"],
            &["--server-addr", "nowhere"],
        ] {
            assert!(ServerConfig::try_from(args(extra)).is_err(), "{extra:?}");
        }
    }

    #[test]
    fn api_key_is_not_logged() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert!(!format!("{config:?}").contains("api_key: \"k\""));
    }

    #[test]
    fn negative_offsets_are_accepted() {
        let config =
            ServerConfig::try_from(args(&["--quota-utc-offset-minutes", "-300"])).unwrap();
        assert_eq!(config.quota.schedule.offset().local_minus_utc(), -300 * 60);
    }
}
