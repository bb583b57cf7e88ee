// Local credential source backed by a netrc file

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use dialoguer::{Input, Password};

use crate::error::{CredentialError, Result};

/// Default authentication host (NASA Earthdata Login)
pub const DEFAULT_AUTH_HOST: &str = "urs.earthdata.nasa.gov";

/// Netrc file name for the host operating system
pub fn netrc_file_name() -> &'static str {
    if cfg!(windows) {
        "_netrc"
    } else {
        ".netrc"
    }
}

/// Default netrc location in the user's home directory
pub fn default_netrc_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(netrc_file_name()))
}

/// A single machine entry
#[derive(Clone, PartialEq, Eq, Default)]
pub struct NetrcEntry {
    pub login: Option<String>,
    pub password: Option<String>,
    pub account: Option<String>,
}

impl std::fmt::Debug for NetrcEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetrcEntry")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "** redacted **"))
            .field("account", &self.account)
            .finish()
    }
}

/// Parsed netrc contents
#[derive(Debug, Clone, Default)]
pub struct Netrc {
    machines: HashMap<String, NetrcEntry>,
    default: Option<NetrcEntry>,
}

impl Netrc {
    /// Parse netrc text.
    ///
    /// Tokens are whitespace separated and may be double quoted, with `\`
    /// escaping the next character. `#` starts a comment that runs to the end
    /// of the line. `macdef` bodies run until the next blank line and are
    /// ignored.
    pub fn parse(content: &str) -> Self {
        let mut netrc = Netrc::default();
        let mut current: Option<(Option<String>, NetrcEntry)> = None;
        let mut lexer = Lexer::new(content);

        while let Some(token) = lexer.next_token() {
            match token.as_str() {
                "machine" => {
                    netrc.finish(current.take());
                    let host = lexer.next_token().unwrap_or_default();
                    current = Some((Some(host), NetrcEntry::default()));
                }
                "default" => {
                    netrc.finish(current.take());
                    current = Some((None, NetrcEntry::default()));
                }
                "login" | "password" | "account" => {
                    let value = lexer.next_token();
                    if let Some((_, entry)) = current.as_mut() {
                        match token.as_str() {
                            "login" => entry.login = value,
                            "password" => entry.password = value,
                            _ => entry.account = value,
                        }
                    }
                }
                "macdef" => lexer.skip_macro_body(),
                t if t.starts_with('#') => lexer.skip_line(),
                _ => {
                    tracing::debug!("Ignoring unknown netrc token: {}", token);
                }
            }
        }
        netrc.finish(current.take());

        netrc
    }

    fn finish(&mut self, entry: Option<(Option<String>, NetrcEntry)>) {
        match entry {
            // First matching machine wins
            Some((Some(host), entry)) => {
                self.machines.entry(host).or_insert(entry);
            }
            Some((None, entry)) => {
                self.default.get_or_insert(entry);
            }
            None => {}
        }
    }

    /// Entry for `host`, falling back to the `default` entry
    pub fn authenticators(&self, host: &str) -> Option<&NetrcEntry> {
        self.machines.get(host).or(self.default.as_ref())
    }

    /// Whether an explicit `machine` entry exists for `host`
    pub fn has_machine(&self, host: &str) -> bool {
        self.machines.contains_key(host)
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            chars: content.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> Option<String> {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut token = String::new();
        if self.chars.next_if_eq(&'"').is_some() {
            while let Some(c) = self.chars.next() {
                match c {
                    '"' => return Some(token),
                    '\\' => token.extend(self.chars.next()),
                    _ => token.push(c),
                }
            }
            // Unterminated quote: keep what was read
            return Some(token);
        }

        while let Some(c) = self.chars.next_if(|c| !c.is_whitespace()) {
            if c == '\\' {
                token.extend(self.chars.next());
            } else {
                token.push(c);
            }
        }
        (!token.is_empty()).then_some(token)
    }

    fn skip_line(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_macro_body(&mut self) {
        // The rest of the macdef line names the macro
        self.skip_line();
        loop {
            let mut blank = true;
            let mut ended = true;
            for c in self.chars.by_ref() {
                if c == '\n' {
                    ended = false;
                    break;
                }
                if !c.is_whitespace() {
                    blank = false;
                }
            }
            if blank || ended {
                return;
            }
        }
    }
}

/// Render a value as a netrc token, quoting it when it would not survive
/// whitespace splitting
fn quote_token(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.starts_with('#')
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Username/password pair used for HTTP Basic auth
#[derive(Clone)]
pub struct Login {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"** redacted **")
            .finish()
    }
}

/// Source of interactive username/password input
pub trait CredentialPrompter {
    fn username(&self, host: &str) -> anyhow::Result<String>;
    fn password(&self, host: &str) -> anyhow::Result<String>;
}

/// Prompts on the terminal; the password is not echoed
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl CredentialPrompter for TerminalPrompter {
    fn username(&self, host: &str) -> anyhow::Result<String> {
        // Input re-asks on empty answers
        let username: String = Input::new()
            .with_prompt(format!("Enter {} login username", host))
            .interact_text()?;
        Ok(username.trim().to_string())
    }

    fn password(&self, host: &str) -> anyhow::Result<String> {
        let password = Password::new()
            .with_prompt(format!("Enter {} login password", host))
            .interact()?;
        Ok(password)
    }
}

/// What `ensure_local_credentials` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCredentialStatus {
    /// Netrc already had an entry for the host
    AlreadyPresent,
    /// Netrc was created
    Created,
    /// An entry was appended to an existing netrc
    Appended,
}

/// Netrc-backed login store for one authentication host
#[derive(Debug, Clone)]
pub struct LocalCredentialSource {
    path: PathBuf,
    host: String,
}

impl LocalCredentialSource {
    pub fn new(path: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
        }
    }

    /// Source at the platform default netrc location
    pub fn with_default_path(host: impl Into<String>) -> Result<Self> {
        let path = default_netrc_path().ok_or_else(|| {
            CredentialError::CredentialSource("could not determine home directory".to_string())
        })?;
        Ok(Self::new(path, host))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Make sure the netrc has an entry for the host, prompting if it doesn't
    pub fn ensure_local_credentials(
        &self,
        prompter: &dyn CredentialPrompter,
    ) -> Result<LocalCredentialStatus> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let netrc = Netrc::parse(&content);
                // A `default` entry also serves the host, as in `lookup`
                if netrc.authenticators(&self.host).is_some() {
                    tracing::info!(
                        "netrc file {} is already set up for {}",
                        self.path.display(),
                        self.host
                    );
                    return Ok(LocalCredentialStatus::AlreadyPresent);
                }

                tracing::info!(
                    "netrc file {} has no entry for {}, adding one",
                    self.path.display(),
                    self.host
                );
                let login = self.prompt(prompter)?;
                let needs_newline = !content.is_empty() && !content.ends_with('\n');
                self.append_entry(&login, needs_newline)?;
                Ok(LocalCredentialStatus::Appended)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    "netrc file {} not found, creating it for {}",
                    self.path.display(),
                    self.host
                );
                let login = self.prompt(prompter)?;
                self.create_with_entry(&login)?;
                Ok(LocalCredentialStatus::Created)
            }
            Err(e) => Err(CredentialError::CredentialSource(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Read the login for the host
    pub fn lookup(&self) -> Result<Login> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            CredentialError::CredentialSource(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let netrc = Netrc::parse(&content);
        let entry = netrc.authenticators(&self.host).ok_or_else(|| {
            CredentialError::CredentialSource(format!(
                "no entry for {} in {}",
                self.host,
                self.path.display()
            ))
        })?;

        let username = entry.login.clone().ok_or_else(|| {
            CredentialError::CredentialSource(format!("entry for {} has no login", self.host))
        })?;
        let password = entry.password.clone().ok_or_else(|| {
            CredentialError::CredentialSource(format!("entry for {} has no password", self.host))
        })?;

        Ok(Login { username, password })
    }

    fn prompt(&self, prompter: &dyn CredentialPrompter) -> Result<Login> {
        let username = prompter
            .username(&self.host)
            .map_err(|e| CredentialError::CredentialSource(format!("failed to read username: {}", e)))?;
        let password = prompter
            .password(&self.host)
            .map_err(|e| CredentialError::CredentialSource(format!("failed to read password: {}", e)))?;

        if username.is_empty() || password.is_empty() {
            return Err(CredentialError::CredentialSource(
                "username and password must not be empty".to_string(),
            ));
        }

        Ok(Login { username, password })
    }

    fn entry_text(&self, login: &Login) -> String {
        format!(
            "machine {}\nlogin {}\npassword {}\n",
            self.host,
            quote_token(&login.username),
            quote_token(&login.password)
        )
    }

    fn create_with_entry(&self, login: &Login) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(|e| self.io_error("create", e))?;
        self.write_entry(&mut file, login, false)
    }

    fn append_entry(&self, login: &Login, leading_newline: bool) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error("open", e))?;
        self.write_entry(&mut file, login, leading_newline)
    }

    fn write_entry(&self, file: &mut File, login: &Login, leading_newline: bool) -> Result<()> {
        let mut text = self.entry_text(login);
        if leading_newline {
            text.insert(0, '\n');
        }

        file.write_all(text.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error("write", e))?;

        self.restrict_permissions(file)
    }

    #[cfg(unix)]
    fn restrict_permissions(&self, file: &File) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| self.io_error("restrict permissions of", e))
    }

    #[cfg(not(unix))]
    fn restrict_permissions(&self, _file: &File) -> Result<()> {
        Ok(())
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> CredentialError {
        CredentialError::CredentialSource(format!(
            "failed to {} {}: {}",
            action,
            self.path.display(),
            e
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedPrompter {
        username: &'static str,
        password: &'static str,
        calls: Cell<u32>,
    }

    impl FixedPrompter {
        fn new(username: &'static str, password: &'static str) -> Self {
            Self {
                username,
                password,
                calls: Cell::new(0),
            }
        }
    }

    impl CredentialPrompter for FixedPrompter {
        fn username(&self, _host: &str) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.username.to_string())
        }

        fn password(&self, _host: &str) -> anyhow::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.password.to_string())
        }
    }

    #[test]
    fn test_parse_multiline_entries() {
        let netrc = Netrc::parse(
            "machine urs.earthdata.nasa.gov\nlogin alice\npassword s3cret\n\nmachine other.host login bob password hunter2\n",
        );

        let entry = netrc.authenticators("urs.earthdata.nasa.gov").unwrap();
        assert_eq!(entry.login.as_deref(), Some("alice"));
        assert_eq!(entry.password.as_deref(), Some("s3cret"));

        let entry = netrc.authenticators("other.host").unwrap();
        assert_eq!(entry.login.as_deref(), Some("bob"));
        assert_eq!(entry.password.as_deref(), Some("hunter2"));

        assert!(netrc.authenticators("missing.host").is_none());
    }

    #[test]
    fn test_parse_default_and_macdef() {
        let netrc = Netrc::parse(
            "macdef init\ncd /pub\nbinary\n\nmachine a.host login a password pa\ndefault login anon password guest\n",
        );

        assert!(netrc.has_machine("a.host"));
        assert!(!netrc.has_machine("b.host"));

        let entry = netrc.authenticators("b.host").unwrap();
        assert_eq!(entry.login.as_deref(), Some("anon"));
    }

    #[test]
    fn test_parse_trailing_space_in_password_line() {
        let netrc = Netrc::parse("machine h\nlogin u\npassword p \n");
        assert_eq!(netrc.authenticators("h").unwrap().password.as_deref(), Some("p"));
    }

    #[test]
    fn test_parse_quoted_tokens_and_comments() {
        let netrc = Netrc::parse(
            "# personal logins\nmachine h login \"a b\" password \"say \\\"hi\\\" \\\\ bye\"\nmachine g login x\\ y password pw # trailing\n",
        );

        let entry = netrc.authenticators("h").unwrap();
        assert_eq!(entry.login.as_deref(), Some("a b"));
        assert_eq!(entry.password.as_deref(), Some("say \"hi\" \\ bye"));

        let entry = netrc.authenticators("g").unwrap();
        assert_eq!(entry.login.as_deref(), Some("x y"));
        assert_eq!(entry.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_quote_token() {
        assert_eq!(quote_token("s3cret"), "s3cret");
        assert_eq!(quote_token("a b"), "\"a b\"");
        assert_eq!(quote_token("q\"\\"), "\"q\\\"\\\\\"");
        assert_eq!(quote_token("#hash"), "\"#hash\"");
    }

    #[test]
    fn test_password_with_spaces_survives_write_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);

        let status = source
            .ensure_local_credentials(&FixedPrompter::new("alice", "correct horse battery"))
            .unwrap();
        assert_eq!(status, LocalCredentialStatus::Created);

        let login = source.lookup().unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password, "correct horse battery");
    }

    #[test]
    fn test_password_with_quotes_survives_append_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        std::fs::write(&path, "machine other.host login bob password pw\n").unwrap();
        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);

        let status = source
            .ensure_local_credentials(&FixedPrompter::new("alice", r#"p"w\d #1"#))
            .unwrap();
        assert_eq!(status, LocalCredentialStatus::Appended);

        assert_eq!(source.lookup().unwrap().password, r#"p"w\d #1"#);
        let netrc = Netrc::parse(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(
            netrc.authenticators("other.host").unwrap().password.as_deref(),
            Some("pw")
        );
    }

    #[test]
    fn test_ensure_noop_when_default_entry_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        let original = "default login anon password guest\n";
        std::fs::write(&path, original).unwrap();

        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        let prompter = FixedPrompter::new("nobody", "nothing");

        let status = source.ensure_local_credentials(&prompter).unwrap();
        assert_eq!(status, LocalCredentialStatus::AlreadyPresent);
        assert_eq!(prompter.calls.get(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(source.lookup().unwrap().username, "anon");
    }

    #[test]
    fn test_ensure_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        let prompter = FixedPrompter::new("alice", "s3cret");

        let status = source.ensure_local_credentials(&prompter).unwrap();
        assert_eq!(status, LocalCredentialStatus::Created);
        assert_eq!(prompter.calls.get(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "machine urs.earthdata.nasa.gov\nlogin alice\npassword s3cret\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let login = source.lookup().unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password, "s3cret");
    }

    #[test]
    fn test_ensure_appends_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        std::fs::write(&path, "machine other.host login bob password pw").unwrap();

        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        let prompter = FixedPrompter::new("alice", "s3cret");

        let status = source.ensure_local_credentials(&prompter).unwrap();
        assert_eq!(status, LocalCredentialStatus::Appended);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("machine other.host login bob password pw\n"));
        assert!(content.contains("machine urs.earthdata.nasa.gov\nlogin alice\npassword s3cret\n"));

        // existing entries are untouched
        let netrc = Netrc::parse(&content);
        assert_eq!(
            netrc.authenticators("other.host").unwrap().login.as_deref(),
            Some("bob")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_ensure_noop_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        let original = "machine urs.earthdata.nasa.gov\nlogin alice\npassword s3cret\n";
        std::fs::write(&path, original).unwrap();

        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        let prompter = FixedPrompter::new("nobody", "nothing");

        let status = source.ensure_local_credentials(&prompter).unwrap();
        assert_eq!(status, LocalCredentialStatus::AlreadyPresent);
        assert_eq!(prompter.calls.get(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_ensure_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");
        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        let prompter = FixedPrompter::new("alice", "");

        let err = source.ensure_local_credentials(&prompter).unwrap_err();
        assert!(matches!(err, CredentialError::CredentialSource(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_lookup_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalCredentialSource::new(dir.path().join("absent"), DEFAULT_AUTH_HOST);

        let err = source.lookup().unwrap_err();
        assert!(matches!(err, CredentialError::CredentialSource(_)));
    }

    #[test]
    fn test_lookup_missing_entry_and_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".netrc");

        std::fs::write(&path, "machine other.host login bob password pw\n").unwrap();
        let source = LocalCredentialSource::new(&path, DEFAULT_AUTH_HOST);
        assert!(matches!(
            source.lookup().unwrap_err(),
            CredentialError::CredentialSource(_)
        ));

        std::fs::write(&path, "machine urs.earthdata.nasa.gov login alice\n").unwrap();
        assert!(matches!(
            source.lookup().unwrap_err(),
            CredentialError::CredentialSource(_)
        ));
    }

    #[test]
    fn test_login_debug_redacts_password() {
        let login = Login {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let printed = format!("{:?}", login);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_netrc_file_name() {
        if cfg!(windows) {
            assert_eq!(netrc_file_name(), "_netrc");
        } else {
            assert_eq!(netrc_file_name(), ".netrc");
        }
    }
}
