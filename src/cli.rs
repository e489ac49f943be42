// src/cli.rs
// CLI argument definitions (ambient), grounded on
// `backend/src/cli/args.rs`'s `clap::Parser` style.

use clap::Parser;

/// Batched, relation-aware retention and cascade-delete engine for PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "db-cleaner")]
#[command(version)]
#[command(about = "Retention and cascade-delete engine for PostgreSQL", long_about = None)]
pub struct CliArgs {
    /// Path to the YAML config file. Falls back to `DB_CLEANER_CONFIG`, then
    /// `./config/config.yaml`.
    #[arg(long)]
    pub config: Option<String>,

    /// Preview deletions without committing anything. Overrides the config
    /// file's and environment's `dry_run` setting when set.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Resolves the effective dry-run flag: CLI flag wins over env/config
    /// (an Open Question resolution recorded in DESIGN.md, since the config
    /// layer's own `dry_run` has already folded in the `DRY_RUN` env var by
    /// the time this runs).
    pub fn resolve_dry_run(&self, config_dry_run: bool) -> bool {
        self.dry_run || config_dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_config_default() {
        let args = CliArgs { config: None, dry_run: true };
        assert!(args.resolve_dry_run(false));
    }

    #[test]
    fn config_value_preserved_when_cli_flag_absent() {
        let args = CliArgs { config: None, dry_run: false };
        assert!(args.resolve_dry_run(true));
        assert!(!args.resolve_dry_run(false));
    }
}
