use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hq")]
#[command(about = "Run OQL queries against a heap snapshot", long_about = None)]
pub struct Cli {
    #[arg(value_name = "QUERY", help = "A literal OQL query", group = "query")]
    pub query_string: Option<String>,
    #[arg(short, long, help = "A file to read the query from", group = "query")]
    pub query_path: Option<PathBuf>,
    #[arg(short, long, help = "A JSON snapshot description", value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
    #[arg(long, help = "Print the parsed query tree instead of running it")]
    pub ast: bool,
    #[arg(long, help = "Emit results as JSON")]
    pub json: bool,
    #[arg(
        long,
        help = "Merge the queries in this file (one per line) into a single batch query and print it",
        value_name = "FILE"
    )]
    pub merge_batch: Option<PathBuf>,
    #[arg(long, help = "Override the method filter", value_name = "FILTER")]
    pub method_filter: Option<String>,
    #[arg(long, help = "Write logs to this file instead of stderr")]
    pub log_file: Option<PathBuf>,
}
