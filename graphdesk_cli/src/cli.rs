use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "graphdesk")]
#[command(about = "Outlook mail threads, calendar, Teams meetings and OneDrive from the terminal")]
#[command(version)]
#[command(after_help = "\x1b[1;36mQuick Start:\x1b[0m
  graphdesk login --client-id <id>        Sign in with a device code
  graphdesk mail date today               Today's messages
  graphdesk mail thread <message-id>      Full thread of a message
  graphdesk calendar date \"this week\"     This week's events
  graphdesk ask \"emails from megan\"       Route a question to a tool

\x1b[1;36mAuthentication:\x1b[0m
  graphdesk config set client_id <id>     Store a credential field
  graphdesk config show                   View stored configuration
  graphdesk config test                   Check the token against Graph")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Mailbox (user principal name) to act on instead of the signed-in user
    #[arg(long, global = true)]
    pub mailbox: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Outlook mail: lookups, threads and analytics
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  graphdesk mail date 2024-05-01
  graphdesk mail sender megan --since \"last 7 days\"
  graphdesk mail thread <message-id>
  graphdesk mail senders --since 2024-05-01 --top 5")]
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },

    /// Calendar events
    #[command(alias = "cal")]
    Calendar {
        #[command(subcommand)]
        action: CalendarAction,
    },

    /// Teams online meetings: details, transcripts, audience, attendance
    Meeting {
        #[command(subcommand)]
        action: MeetingAction,
    },

    /// OneDrive files
    Drive {
        #[command(subcommand)]
        action: DriveAction,
    },

    /// Route a free-text question to a tool and run it
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  graphdesk ask \"emails about budget last week\"
  graphdesk ask \"who attended o2\" --dry-run
  graphdesk ask \"what did megan send me about hiring\" --llm")]
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Route with the configured LLM instead of the pattern router
        #[arg(long)]
        llm: bool,
        /// Show the routed call without executing it
        #[arg(long)]
        dry_run: bool,
        /// List the supported query patterns
        #[arg(long, conflicts_with_all = ["llm", "dry_run"])]
        patterns: bool,
    },

    /// List available tools
    Tools,

    /// Call any tool by name
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  graphdesk call mail_thread <message-id>
  graphdesk call mail_by_sender --sender megan --limit 5
  graphdesk call drive_list --args '{\"path\": \"Reports\"}'")]
    Call {
        /// Tool name
        tool: String,
        /// Parameters: positional values or --key value pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        params: Vec<String>,
        /// Arguments as a JSON object (merged under the parameters)
        #[arg(long)]
        args: Option<String>,
    },

    /// Manage stored credentials
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Sign in with the device code flow and store the tokens
    Login {
        /// Tenant ID (defaults to the stored value, then 'common')
        #[arg(long)]
        tenant_id: Option<String>,
        /// App registration client ID (defaults to the stored value)
        #[arg(long)]
        client_id: Option<String>,
        /// Space-separated scopes
        #[arg(long)]
        scopes: Option<String>,
    },
}

/// Date window flags shared by the lookup commands.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct Window {
    /// Start: YYYY-MM-DD, ISO datetime, or a phrase like "last 7 days"
    #[arg(long)]
    pub since: Option<String>,
    /// End: YYYY-MM-DD (whole day) or ISO datetime
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum MailAction {
    /// Messages received on a date ("today", "yesterday", YYYY-MM-DD) or in a window
    Date {
        date: Option<String>,
        #[command(flatten)]
        window: Window,
        /// Restrict to a mail folder (inbox, sentitems, ...)
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Messages from a sender (name or address substring)
    Sender {
        sender: String,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
        /// Messages to examine
        #[arg(long)]
        scan: Option<usize>,
    },
    /// Messages whose subject contains the text
    Subject {
        subject: String,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
        #[arg(long)]
        scan: Option<usize>,
    },
    /// One message by id or handle
    Get {
        message_id: String,
        /// Include the text body
        #[arg(long)]
        body: bool,
    },
    /// Full conversation thread of a message, oldest first
    Thread {
        /// Message id or handle
        message_id: Option<String>,
        /// Conversation id, when no message id is given
        #[arg(long)]
        conversation_id: Option<String>,
        /// Folder for the folder strategy
        #[arg(long)]
        folder: Option<String>,
        /// Messages the recent-mail scan may examine (100-1000)
        #[arg(long)]
        scan_cap: Option<usize>,
    },
    /// Most frequent words in recent subjects and previews
    Themes {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        scan: Option<usize>,
    },
    /// Senders ranked by message count
    Senders {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        scan: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CalendarAction {
    /// Events on a date or in a window
    Date {
        date: Option<String>,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Events organized by someone
    Organizer {
        organizer: String,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Events whose subject contains the text
    Subject {
        subject: String,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Organizers ranked by event count
    Organizers {
        #[command(flatten)]
        window: Window,
        #[arg(long)]
        top: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum MeetingAction {
    /// Online meeting details
    Get { meeting_id: String },
    /// Find online meetings by title
    Find {
        title: String,
        #[command(flatten)]
        window: Window,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Transcript as speaker turns
    Transcript {
        meeting_id: String,
        /// A specific transcript (default: the latest)
        #[arg(long)]
        transcript_id: Option<String>,
    },
    /// Invited attendees merged with the participant list
    Audience {
        #[arg(long, required_unless_present = "meeting_id")]
        event_id: Option<String>,
        #[arg(long)]
        meeting_id: Option<String>,
    },
    /// Attendance records
    Attendance { meeting_id: String },
}

#[derive(Subcommand, Clone)]
pub enum DriveAction {
    /// List a folder
    Ls {
        path: Option<String>,
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Upload a local file
    Upload {
        local_path: String,
        /// Remote path; a trailing '/' keeps the local file name
        remote_path: Option<String>,
    },
    /// Download a file by handle, item id or path
    Download {
        target: String,
        /// Local file or directory
        #[arg(long, short)]
        dest: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigAction {
    /// Show stored configuration (secrets masked)
    Show,
    /// Set a configuration field; secrets are prompted for when no value is given
    Set {
        field: String,
        value: Option<String>,
    },
    /// Remove one field, or all stored credentials
    Remove { field: Option<String> },
    /// Test the credentials against Graph
    Test,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Pretty,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Plain text output
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_commands_and_globals() {
        let cli = Cli::try_parse_from([
            "graphdesk", "--output", "json", "mail", "sender", "megan", "--since", "last 7 days",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::Mail {
                action: MailAction::Sender { sender, window, .. },
            } => {
                assert_eq!(sender, "megan");
                assert_eq!(window.since.as_deref(), Some("last 7 days"));
            }
            _ => panic!("expected mail sender"),
        }
    }

    #[test]
    fn call_keeps_hyphenated_params() {
        let cli = Cli::try_parse_from(["graphdesk", "call", "mail_by_sender", "--sender", "megan"]).unwrap();
        match cli.command {
            Commands::Call { tool, params, .. } => {
                assert_eq!(tool, "mail_by_sender");
                assert_eq!(params, vec!["--sender", "megan"]);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn audience_needs_an_id() {
        assert!(Cli::try_parse_from(["graphdesk", "meeting", "audience"]).is_err());
        assert!(Cli::try_parse_from(["graphdesk", "meeting", "audience", "--meeting-id", "o1"]).is_ok());
    }
}
