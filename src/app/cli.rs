use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(
    name = "oauth2ms",
    about = "Fetch an OAuth2 access token from the Microsoft identity platform for mail clients",
    version
)]
pub struct Cli {
    #[arg(
        long = "encode-xoauth2",
        help = "Print the token as a base64 SASL XOAUTH2 string instead of the raw access token"
    )]
    pub encode_xoauth2: bool,

    #[arg(
        short = 'e',
        long = "encrypt-using-fingerprint",
        value_name = "ID",
        help = "Encrypt the credential file with gpg for this key fingerprint or e-mail"
    )]
    pub encrypt_using_fingerprint: Option<String>,

    #[arg(
        long = "gpg-home",
        value_name = "DIR",
        help = "GnuPG home directory passed to gpg as --homedir"
    )]
    pub gpg_home: Option<PathBuf>,

    #[arg(
        long = "no-browser",
        help = "Print the authorization URL on stderr instead of opening a browser"
    )]
    pub no_browser: bool,

    #[arg(
        long = "redirect-timeout",
        value_name = "SECS",
        help = "Seconds to wait for the authorization redirect (0 waits forever); overrides redirect_timeout_secs"
    )]
    pub redirect_timeout: Option<u64>,

    #[arg(
        long,
        env = "OAUTH2MS_CONFIG",
        value_name = "FILE",
        help = "Config file to use instead of searching $XDG_CONFIG_HOME and $XDG_CONFIG_DIRS"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "credentials-file",
        env = "OAUTH2MS_CREDENTIALS",
        value_name = "FILE",
        help = "Credential file to use instead of $XDG_DATA_HOME/oauth2ms/credentials.bin"
    )]
    pub credentials_file: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Raise log verbosity on stderr (repeatable)"
    )]
    pub verbose: u8,
}
