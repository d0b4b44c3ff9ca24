//! Server configuration.
//!
//! CLI flags take precedence, then environment variables, then defaults:
//!
//! | Flag | Env | Default | Meaning |
//! |------|-----|---------|---------|
//! | `--port` | `ZRP_PORT` | 3000 | HTTP listen port |
//! | `--db` | `ZRP_DB` | zrp.db | SQLite database file |
//! | `--pm-dir` | `ZRP_PM_DIR` | — | external parts library directory |
//! | `--gitplm-ui` | `ZRP_GITPLM_UI` | — | parts-library UI base URL |
//! | — | `ZRP_UPLOADS_DIR` | uploads | attachment storage directory |
//! | — | `ZRP_COMPANY_NAME` | ZRP | company name on rendered documents |
//! | — | `ZRP_COMPANY_EMAIL` | — | inbox for dispatched notifications |

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "zrp-server", about = "ERP server for hardware-electronics manufacturing")]
pub struct Cli {
    /// HTTP listen port
    #[arg(long, env = "ZRP_PORT", default_value_t = 3000)]
    pub port: u16,

    /// SQLite database file
    #[arg(long, env = "ZRP_DB", default_value = "zrp.db")]
    pub db: String,

    /// Directory holding the externally managed parts library (CSV)
    #[arg(long = "pmDir", alias = "pm-dir", env = "ZRP_PM_DIR")]
    pub pm_dir: Option<String>,

    /// Base URL of the parts-library UI, linked from part views
    #[arg(long = "gitplm-ui", env = "ZRP_GITPLM_UI")]
    pub gitplm_ui: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub pm_dir: Option<String>,
    pub gitplm_ui: Option<String>,
    pub uploads_dir: String,
    pub company_name: String,
    pub company_email: Option<String>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            port: cli.port,
            db_path: cli.db,
            pm_dir: cli.pm_dir,
            gitplm_ui: cli.gitplm_ui,
            uploads_dir: std::env::var("ZRP_UPLOADS_DIR").unwrap_or_else(|_| "uploads".into()),
            company_name: std::env::var("ZRP_COMPANY_NAME").unwrap_or_else(|_| "ZRP".into()),
            company_email: std::env::var("ZRP_COMPANY_EMAIL").ok(),
        }
    }

    /// Defaults for tests.
    pub fn for_tests(db_path: impl Into<String>, uploads_dir: impl Into<String>) -> Self {
        Self {
            port: 0,
            db_path: db_path.into(),
            pm_dir: None,
            gitplm_ui: None,
            uploads_dir: uploads_dir.into(),
            company_name: "ZRP".into(),
            company_email: Some("ops@example.com".into()),
        }
    }
}
