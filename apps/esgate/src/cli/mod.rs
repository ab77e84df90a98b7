//! # esgate CLI Module
//!
//! This module implements the CLI interface for esgate.
//!
//! ## Available Commands
//!
//! - `check` - Load metadata for every configured index and report it
//! - `fields` - Show field types and array fields
//! - `is-array` - Whether a field is a registered array field
//! - `query` - Fetch one page of documents
//! - `count` - Count matching documents
//! - `export` - Stream every matching document as NDJSON
//! - `histogram` - Numeric range aggregation
//! - `terms` - Text terms aggregation with nested breakdowns

mod commands;

use crate::config::AppConfig;
use clap::{Args, Parser, Subcommand};
use esgate_core::{ErrorKind, GateError};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// esgate - tier-gated queries and aggregations over Elasticsearch
///
/// Structured filters are validated against index metadata, translated,
/// executed, and shaped for the caller's access tier.
#[derive(Parser, Debug)]
#[command(name = "esgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, default_value = "esgate.toml")]
    pub config: PathBuf,

    /// Minimum count threshold of the caller's tier (0 = exact values)
    #[arg(short = 'T', long, global = true)]
    pub threshold: Option<u64>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Document type and filter shared by every data command.
#[derive(Args, Debug, Clone)]
pub struct Selection {
    /// Document type; the index is resolved from configuration
    #[arg(short = 't', long = "type")]
    pub doc_type: String,

    /// Filter tree as JSON, e.g. '{"EQ": {"field": "gender", "value": "female"}}'
    #[arg(short, long)]
    pub filter: Option<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load metadata for every configured index and report it
    Check,

    /// Show field types and array fields
    Fields {
        /// Restrict output to one index
        #[arg(short, long)]
        index: Option<String>,
    },

    /// Whether a field is a registered array field
    IsArray {
        /// Index name
        index: String,

        /// Dotted field path
        field: String,
    },

    /// Fetch one page of documents
    Query {
        #[command(flatten)]
        selection: Selection,

        /// Projected fields (comma-separated)
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,

        /// Sort keys as field[:asc|desc], repeatable
        #[arg(short, long)]
        sort: Vec<String>,

        /// Index of the first document
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Page size
        #[arg(short = 'n', long)]
        size: Option<u64>,
    },

    /// Count matching documents
    Count {
        #[command(flatten)]
        selection: Selection,
    },

    /// Stream every matching document as NDJSON
    Export {
        #[command(flatten)]
        selection: Selection,

        /// Projected fields (comma-separated)
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<String>>,

        /// Sort keys as field[:asc|desc], repeatable
        #[arg(short, long)]
        sort: Vec<String>,

        /// Output file (stdout when omitted)
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Numeric range aggregation
    Histogram {
        #[command(flatten)]
        selection: Selection,

        /// Numeric field to bucket
        #[arg(long)]
        field: String,

        /// Range start (observed minimum when omitted)
        #[arg(long, allow_negative_numbers = true)]
        start: Option<f64>,

        /// Range end (observed maximum when omitted)
        #[arg(long, allow_negative_numbers = true)]
        end: Option<f64>,

        /// Fixed bucket width
        #[arg(long)]
        step: Option<f64>,

        /// Number of equal-width buckets
        #[arg(long)]
        bins: Option<u64>,

        /// Drop filter terms on the aggregated field
        #[arg(long)]
        no_filter_self: bool,

        /// Authorization filter as JSON, always applied
        #[arg(long)]
        auth_filter: Option<String>,
    },

    /// Text terms aggregation with nested breakdowns
    Terms {
        #[command(flatten)]
        selection: Selection,

        /// Field to aggregate
        #[arg(long)]
        field: String,

        /// Sub-fields broken down per bucket (comma-separated)
        #[arg(long, value_delimiter = ',')]
        nested: Vec<String>,

        /// Drop filter terms on the aggregated field
        #[arg(long)]
        no_filter_self: bool,

        /// Authorization filter as JSON, always applied
        #[arg(long)]
        auth_filter: Option<String>,
    },
}

// =============================================================================
// ERRORS
// =============================================================================

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller's tier does not allow raw records from this index.
    #[error("Raw data access to '{index}' denied at threshold {threshold}")]
    Denied { index: String, threshold: u64 },
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Gate(e) => match e.kind() {
                ErrorKind::InvalidInput => 2,
                ErrorKind::NotFound => 3,
                ErrorKind::Upstream => 4,
                ErrorKind::Configuration => 5,
            },
            Self::Denied { .. } => 6,
            Self::Io(_) | Self::Json(_) => 1,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::load(&cli.config)?;
    let threshold = cli.threshold.unwrap_or(config.tier.default_threshold);
    let gate = open_gate(&config).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let output = Output {
        json_mode: cli.json_mode,
        threshold,
    };

    let result = match cli.command {
        Some(Commands::Check) | None => cmd_check(&gate, &output, &mut out),
        Some(Commands::Fields { index }) => cmd_fields(&gate, &output, &mut out, index.as_deref()),
        Some(Commands::IsArray { index, field }) => {
            cmd_is_array(&gate, &output, &mut out, &index, &field)
        }
        Some(Commands::Query {
            selection,
            fields,
            sort,
            offset,
            size,
        }) => {
            cmd_query(
                &gate,
                &output,
                &mut out,
                &selection,
                fields,
                &sort,
                offset,
                size,
            )
            .await
        }
        Some(Commands::Count { selection }) => {
            cmd_count(&gate, &output, &mut out, &selection).await
        }
        Some(Commands::Export {
            selection,
            fields,
            sort,
            output: path,
        }) => match path {
            Some(path) => {
                let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
                cmd_export(&gate, &output, &mut file, &selection, fields, &sort).await
            }
            None => cmd_export(&gate, &output, &mut out, &selection, fields, &sort).await,
        },
        Some(Commands::Histogram {
            selection,
            field,
            start,
            end,
            step,
            bins,
            no_filter_self,
            auth_filter,
        }) => {
            let range = HistogramRange {
                start,
                end,
                step,
                bins,
            };
            cmd_histogram(
                &gate,
                &output,
                &mut out,
                &selection,
                &field,
                range,
                !no_filter_self,
                auth_filter.as_deref(),
            )
            .await
        }
        Some(Commands::Terms {
            selection,
            field,
            nested,
            no_filter_self,
            auth_filter,
        }) => {
            cmd_terms(
                &gate,
                &output,
                &mut out,
                &selection,
                &field,
                nested,
                !no_filter_self,
                auth_filter.as_deref(),
            )
            .await
        }
    };

    out.flush()?;
    gate.shutdown();
    result
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use esgate_core::EngineError;

    #[test]
    fn parses_query_with_repeated_sort_and_field_list() {
        let cli = Cli::try_parse_from([
            "esgate",
            "--threshold",
            "50",
            "query",
            "--type",
            "subject",
            "--fields",
            "age,gender",
            "-s",
            "age:desc",
            "-s",
            "gender",
            "--size",
            "20",
        ])
        .expect("parse");
        assert_eq!(cli.threshold, Some(50));
        match cli.command {
            Some(Commands::Query {
                selection,
                fields,
                sort,
                size,
                offset,
            }) => {
                assert_eq!(selection.doc_type, "subject");
                assert_eq!(fields, Some(vec!["age".to_string(), "gender".to_string()]));
                assert_eq!(sort, ["age:desc", "gender"]);
                assert_eq!(size, Some(20));
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_histogram_with_negative_bounds() {
        let cli = Cli::try_parse_from([
            "esgate",
            "histogram",
            "-t",
            "subject",
            "--field",
            "age",
            "--start",
            "-10",
            "--end",
            "90",
            "--bins",
            "5",
            "--no-filter-self",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Histogram {
                start,
                end,
                bins,
                step,
                no_filter_self,
                ..
            }) => {
                assert_eq!(start, Some(-10.0));
                assert_eq!(end, Some(90.0));
                assert_eq!(bins, Some(5));
                assert_eq!(step, None);
                assert!(no_filter_self);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn defaults_to_local_config_file() {
        let cli = Cli::try_parse_from(["esgate", "check"]).expect("parse");
        assert_eq!(cli.config, PathBuf::from("esgate.toml"));
        assert_eq!(cli.threshold, None);
        assert!(!cli.json_mode);
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(CliError::from(GateError::invalid("x")).exit_code(), 2);
        let not_found = GateError::NotFound {
            what: "index",
            name: "x".into(),
        };
        assert_eq!(CliError::from(not_found).exit_code(), 3);
        let upstream = GateError::upstream("search", "subject/subject")(EngineError::Parse(
            "bad".into(),
        ));
        assert_eq!(CliError::from(upstream).exit_code(), 4);
        assert_eq!(
            CliError::from(GateError::Configuration("x".into())).exit_code(),
            5
        );
        let denied = CliError::Denied {
            index: "subject".into(),
            threshold: 50,
        };
        assert_eq!(denied.exit_code(), 6);
        assert!(denied.to_string().contains("subject"));
        let io = CliError::from(std::io::Error::other("disk"));
        assert_eq!(io.exit_code(), 1);
    }
}
