use crate::job::Phase;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Phased thematic-analysis pipeline over case corpora
#[derive(Parser, Debug)]
#[command(
    name = "themata",
    about = "Phased thematic-analysis pipeline over case corpora",
    version,
    long_about = "themata runs a multi-stage qualitative-coding pipeline over a corpus of \
                  case records: initial codes (p2), candidate themes (p3), theme \
                  consolidation (p3b), and final theme assignment (p4). Each phase calls a \
                  configured text-generation provider (Gemini, OpenAI, Claude) once per \
                  case and reports live progress."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose output (debug logging)")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run an analysis phase over a corpus file",
        long_about = "Starts the named phase over the given corpus and streams its progress \
                      until it terminates. A completed p3 run chains automatically into p3b.\n\n\
                      Examples:\n  \
                      themata run p2 data/cases.json\n  \
                      themata run p3 data/cases.json --provider openai\n  \
                      themata run p2 data/cases.json --instructions \"Use Czech legal terms\""
    )]
    Run(RunArgs),

    #[command(
        about = "Re-run initial coding for selected cases",
        long_about = "Regenerates the initial codes of an explicit set of case ids, keeping \
                      the rest of the corpus untouched but still feeding it into the \
                      consistency inventory."
    )]
    Regen(RegenArgs),

    #[command(about = "List configured text-generation providers")]
    Providers,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[arg(value_enum, help = "Phase to run")]
    pub phase: PhaseArg,

    #[arg(value_name = "FILE", help = "Corpus file to analyze")]
    pub data_file: PathBuf,

    #[arg(long, help = "Provider to use (gemini|openai|claude)")]
    pub provider: Option<String>,

    #[arg(long, help = "Model name; routes to its provider by naming convention")]
    pub model: Option<String>,

    #[arg(long, help = "Free-text instructions embedded into every prompt")]
    pub instructions: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct RegenArgs {
    #[arg(value_name = "FILE", help = "Corpus file to analyze")]
    pub data_file: PathBuf,

    #[arg(
        value_name = "CASE_ID",
        required = true,
        help = "Case ids to regenerate"
    )]
    pub case_ids: Vec<String>,

    #[arg(long, help = "Provider to use (gemini|openai|claude)")]
    pub provider: Option<String>,

    #[arg(long, help = "Model name; routes to its provider by naming convention")]
    pub model: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PhaseArg {
    P2,
    P3,
    P3b,
    P4,
}

impl From<PhaseArg> for Phase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::P2 => Phase::P2,
            PhaseArg::P3 => Phase::P3,
            PhaseArg::P3b => Phase::P3b,
            PhaseArg::P4 => Phase::P4,
        }
    }
}
