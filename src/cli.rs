use std::path::PathBuf;

use clap::Parser;

use crate::config::SETTINGS_NAME;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "triage_shipper",
    version,
    about = "Parses forensic triage logs into Elasticsearch through Filebeat",
    arg_required_else_help = true
)]
pub struct Cli {
    #[arg(short, long, value_name = "SYS", help = "Source system whose taxonomy to use (e.g. ubuntu)")]
    pub system: String,

    #[arg(short, long, value_name = "HOST", help = "Elasticsearch URL, including the port number")]
    pub url: String,

    #[arg(short, long, value_name = "INDEX", help = "Index to ship the logs into")]
    pub index: String,

    #[arg(short, long, value_name = "PATH", help = "Filebeat directory")]
    pub path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", default_value = SETTINGS_NAME, help = "Settings file")]
    pub settings: PathBuf,

    #[arg(long, value_name = "LEVEL", help = "Terminal log level (error, warn, info, debug, trace)")]
    pub log_level: Option<String>,

    #[arg(value_name = "DIR", required = true, num_args = 1.., help = "Triage output directories to upload")]
    pub dirs: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_invocation() {
        let cli = Cli::try_parse_from([
            "triage_shipper",
            "-s",
            "ubuntu",
            "-u",
            "http://localhost:9200",
            "-i",
            "triage",
            "-p",
            "./filebeat-linux",
            "case1",
            "case2",
        ])
        .unwrap();

        assert_eq!(cli.system, "ubuntu");
        assert_eq!(cli.index, "triage");
        assert_eq!(cli.path, Some(PathBuf::from("./filebeat-linux")));
        assert_eq!(cli.settings, PathBuf::from(SETTINGS_NAME));
        assert_eq!(cli.dirs, vec![PathBuf::from("case1"), PathBuf::from("case2")]);
    }

    #[test]
    fn test_missing_required_flags_fail() {
        assert!(Cli::try_parse_from(["triage_shipper", "-s", "ubuntu", "case1"]).is_err());
        assert!(Cli::try_parse_from([
            "triage_shipper",
            "-s",
            "ubuntu",
            "-u",
            "http://localhost:9200",
            "-i",
            "triage",
        ])
        .is_err());
    }

    #[test]
    fn test_command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
