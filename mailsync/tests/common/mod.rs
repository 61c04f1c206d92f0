#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use mail_builder::MessageBuilder;
use mailsync::{
    account::{config::AccountConfig, sync::AccountSync},
    envelope::{header_block, Envelope},
    imap::session::{
        self, FetchedMeta, ImapSession, MailboxInfo, SelectedMailbox, SessionFactory,
    },
    maildir::{config::MaildirConfig, MaildirRepository},
    repository::Repository,
    retry::RetryConfig,
};

#[derive(Clone, Debug, Default)]
pub struct Message {
    pub raw: Vec<u8>,
    pub flags: BTreeSet<String>,
}

#[derive(Clone, Debug)]
pub struct Mailbox {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub messages: BTreeMap<u32, Message>,
}

#[derive(Debug)]
struct State {
    mailboxes: BTreeMap<String, Mailbox>,
    denied: HashSet<String>,
    broken: HashSet<String>,
    failures: usize,
    renumber_after_fetch: Option<(String, u32, u32)>,
    connections: usize,
    down: bool,
    uidplus: bool,
}

/// In-memory IMAP server, shared by all the sessions it opens.
#[derive(Clone, Debug)]
pub struct TestServer {
    state: Arc<Mutex<State>>,
}

impl TestServer {
    /// Creates a server with an empty INBOX of UID validity 1.
    pub fn new() -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(State {
                mailboxes: BTreeMap::new(),
                denied: HashSet::new(),
                broken: HashSet::new(),
                failures: 0,
                renumber_after_fetch: None,
                connections: 0,
                down: false,
                uidplus: true,
            })),
        };
        server.add_mailbox("INBOX", 1);
        server
    }

    pub fn add_mailbox(&self, name: &str, uid_validity: u32) {
        self.state.lock().unwrap().mailboxes.insert(
            name.to_owned(),
            Mailbox {
                uid_validity,
                uid_next: 1,
                messages: BTreeMap::new(),
            },
        );
    }

    pub fn set_uid_validity(&self, mailbox: &str, uid_validity: u32) {
        let mut state = self.state.lock().unwrap();
        state.mailboxes.get_mut(mailbox).unwrap().uid_validity = uid_validity;
    }

    /// Changes the UID validity of the mailbox and renumbers its
    /// messages from the given UID, like a server rebuilding its
    /// index.
    pub fn renumber(&self, mailbox: &str, uid_validity: u32, first_uid: u32) {
        let mut state = self.state.lock().unwrap();
        let mailbox = state.mailboxes.get_mut(mailbox).unwrap();
        let messages = std::mem::take(&mut mailbox.messages);

        mailbox.uid_validity = uid_validity;
        mailbox.uid_next = first_uid;

        for message in messages.into_values() {
            mailbox.messages.insert(mailbox.uid_next, message);
            mailbox.uid_next += 1;
        }
    }

    /// Makes every command touching the given mailbox fail with a
    /// `NO` response.
    pub fn deny(&self, mailbox: &str) {
        self.state.lock().unwrap().denied.insert(mailbox.to_owned());
    }

    /// Makes every command touching the given mailbox drop the
    /// connection.
    pub fn break_mailbox(&self, mailbox: &str) {
        self.state.lock().unwrap().broken.insert(mailbox.to_owned());
    }

    /// Makes the next `n` mailbox commands drop the connection.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures = n;
    }

    /// Renumbers the mailbox right after the next message body is
    /// fetched from it.
    pub fn renumber_after_fetch(&self, mailbox: &str, uid_validity: u32, first_uid: u32) {
        self.state.lock().unwrap().renumber_after_fetch =
            Some((mailbox.to_owned(), uid_validity, first_uid));
    }

    /// Counts the sessions opened so far.
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    pub fn set_uidplus(&self, uidplus: bool) {
        self.state.lock().unwrap().uidplus = uidplus;
    }

    pub fn insert(&self, mailbox: &str, uid: u32, raw: Vec<u8>, flags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let mailbox = state.mailboxes.get_mut(mailbox).unwrap();
        let flags = flags.iter().map(|flag| flag.to_string()).collect();
        mailbox.messages.insert(uid, Message { raw, flags });
        mailbox.uid_next = mailbox.uid_next.max(uid + 1);
    }

    pub fn append(&self, mailbox: &str, raw: Vec<u8>, flags: &[&str]) -> u32 {
        let uid = self.state.lock().unwrap().mailboxes[mailbox].uid_next;
        self.insert(mailbox, uid, raw, flags);
        uid
    }

    pub fn remove(&self, mailbox: &str, uid: u32) {
        let mut state = self.state.lock().unwrap();
        state
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .messages
            .remove(&uid);
    }

    pub fn set_flags(&self, mailbox: &str, uid: u32, flags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let message = state
            .mailboxes
            .get_mut(mailbox)
            .unwrap()
            .messages
            .get_mut(&uid)
            .unwrap();
        message.flags = flags.iter().map(|flag| flag.to_string()).collect();
    }

    pub fn mailbox(&self, mailbox: &str) -> Option<Mailbox> {
        self.state.lock().unwrap().mailboxes.get(mailbox).cloned()
    }

    pub fn mailboxes(&self) -> Vec<String> {
        self.state.lock().unwrap().mailboxes.keys().cloned().collect()
    }

    pub fn messages(&self, mailbox: &str) -> BTreeMap<u32, Message> {
        self.mailbox(mailbox)
            .map(|mailbox| mailbox.messages)
            .unwrap_or_default()
    }

    fn check(&self, mailbox: &str) -> session::Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.failures > 0 {
            state.failures -= 1;
            return Err(session::Error::ConnectionLostError("connection reset".into()));
        }

        if state.down || state.broken.contains(mailbox) {
            return Err(session::Error::ConnectionLostError("server down".into()));
        }

        if state.denied.contains(mailbox) {
            return Err(session::Error::NoError(format!("access to {mailbox} denied")));
        }

        if !state.mailboxes.contains_key(mailbox) {
            return Err(session::Error::MailboxNotFoundError(mailbox.to_owned()));
        }

        Ok(())
    }
}

#[async_trait]
impl SessionFactory for TestServer {
    async fn connect(&self) -> session::Result<Box<dyn ImapSession>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.down {
                return Err(session::Error::ConnectionLostError("server down".into()));
            }
            state.connections += 1;
        }

        Ok(Box::new(TestSession {
            server: self.clone(),
            selected: None,
        }))
    }
}

pub struct TestSession {
    server: TestServer,
    selected: Option<String>,
}

impl TestSession {
    fn selected(&self) -> session::Result<String> {
        let mailbox = self
            .selected
            .clone()
            .ok_or(session::Error::NoMailboxSelectedError)?;
        self.server.check(&mailbox)?;
        Ok(mailbox)
    }
}

#[async_trait]
impl ImapSession for TestSession {
    async fn list(&mut self, _subscribed_only: bool) -> session::Result<Vec<MailboxInfo>> {
        if self.server.state.lock().unwrap().down {
            return Err(session::Error::ConnectionLostError("server down".into()));
        }

        Ok(self
            .server
            .mailboxes()
            .into_iter()
            .map(MailboxInfo::new)
            .collect())
    }

    async fn create(&mut self, mailbox: &str) -> session::Result<()> {
        if self.server.mailbox(mailbox).is_none() {
            self.server.add_mailbox(mailbox, 1);
        }
        Ok(())
    }

    async fn select(&mut self, mailbox: &str) -> session::Result<SelectedMailbox> {
        self.server.check(mailbox)?;
        self.selected = Some(mailbox.to_owned());

        let mailbox = self.server.mailbox(mailbox).unwrap();
        Ok(SelectedMailbox {
            uid_validity: mailbox.uid_validity,
            exists: mailbox.messages.len() as u32,
        })
    }

    async fn fetch_meta(&mut self) -> session::Result<Vec<FetchedMeta>> {
        let mailbox = self.selected()?;

        Ok(self
            .server
            .messages(&mailbox)
            .into_iter()
            .map(|(uid, message)| FetchedMeta {
                uid,
                flags: message.flags.into_iter().collect(),
                size: message.raw.len() as u64,
                headers: header_block(&message.raw).to_vec(),
            })
            .collect())
    }

    async fn fetch_body(&mut self, uid: u32) -> session::Result<Option<Vec<u8>>> {
        let mailbox = self.selected()?;
        let raw = self
            .server
            .messages(&mailbox)
            .remove(&uid)
            .map(|message| message.raw);

        let renumber = {
            let mut state = self.server.state.lock().unwrap();
            match &state.renumber_after_fetch {
                Some((name, ..)) if *name == mailbox => state.renumber_after_fetch.take(),
                _ => None,
            }
        };

        if let Some((name, uid_validity, first_uid)) = renumber {
            self.server.renumber(&name, uid_validity, first_uid);
        }

        Ok(raw)
    }

    async fn append(
        &mut self,
        mailbox: &str,
        raw: &[u8],
        flags: &[String],
    ) -> session::Result<Option<u32>> {
        self.server.check(mailbox)?;

        let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
        let uid = self.server.append(mailbox, raw.to_vec(), &flags);

        if self.server.state.lock().unwrap().uidplus {
            Ok(Some(uid))
        } else {
            Ok(None)
        }
    }

    async fn store_flags(&mut self, uid: u32, flags: &[String]) -> session::Result<()> {
        let mailbox = self.selected()?;
        let mut state = self.server.state.lock().unwrap();
        let mailbox = state.mailboxes.get_mut(&mailbox).unwrap();

        if let Some(message) = mailbox.messages.get_mut(&uid) {
            message.flags = flags.iter().cloned().collect();
        }

        Ok(())
    }

    async fn add_flags(&mut self, uid: u32, flags: &[String]) -> session::Result<()> {
        let mailbox = self.selected()?;
        let mut state = self.server.state.lock().unwrap();
        let mailbox = state.mailboxes.get_mut(&mailbox).unwrap();

        if let Some(message) = mailbox.messages.get_mut(&uid) {
            message.flags.extend(flags.iter().cloned());
        }

        Ok(())
    }

    async fn expunge_uid(&mut self, uid: u32) -> session::Result<()> {
        let mailbox = self.selected()?;
        let mut state = self.server.state.lock().unwrap();
        let mailbox = state.mailboxes.get_mut(&mailbox).unwrap();

        let deleted = mailbox
            .messages
            .get(&uid)
            .map(|message| message.flags.contains("\\Deleted"))
            .unwrap_or_default();

        if deleted {
            mailbox.messages.remove(&uid);
        }

        Ok(())
    }

    async fn noop(&mut self) -> session::Result<()> {
        if self.server.state.lock().unwrap().down {
            return Err(session::Error::ConnectionLostError("server down".into()));
        }
        Ok(())
    }

    async fn logout(&mut self) -> session::Result<()> {
        Ok(())
    }
}

pub fn message(id: &str, subject: &str) -> Vec<u8> {
    let id = format!("{id}@localhost");
    MessageBuilder::new()
        .message_id(id.as_str())
        .from("alice@localhost")
        .to("bob@localhost")
        .subject(subject)
        .text_body(subject)
        .write_to_vec()
        .unwrap()
}

/// Writes a message directly into the `cur` directory of the given
/// Maildir, under the given identity.
pub fn write_local(maildir: &Path, id: &str, info: &str, raw: &[u8]) {
    for dir in ["cur", "new", "tmp"] {
        fs::create_dir_all(maildir.join(dir)).unwrap();
    }
    fs::write(maildir.join("cur").join(format!("{id}:2,{info}")), raw).unwrap();
}

pub fn account_config(root: &Path, name: &str) -> AccountConfig {
    let mut config = AccountConfig::new(name, MaildirConfig::new(root.join(name)));
    config.remote.retry = RetryConfig {
        attempts: 1,
        backoff_ms: 1,
        max_backoff_ms: 1,
        timeout_secs: 5,
    };
    config
}

pub fn account_sync(config: AccountConfig, server: &TestServer, state_dir: &Path) -> AccountSync {
    AccountSync::from_config(config, Arc::new(server.clone()), state_dir).unwrap()
}

/// Lists the envelopes of a local folder, sorted by content identity.
pub async fn local_envelopes(root: &Path, folder: &str) -> Vec<Envelope> {
    let repo = local_repo(root);
    let folder = repo.open_folder(folder).await.unwrap();
    let mut envelopes: Vec<_> = repo
        .list_messages(&folder)
        .await
        .unwrap()
        .envelopes
        .into_values()
        .collect();
    envelopes.sort_by(|a, b| a.content_id.cmp(&b.content_id));
    envelopes
}

/// Lists the content identities of a remote mailbox, sorted.
pub fn remote_content_ids(server: &TestServer, mailbox: &str) -> Vec<String> {
    let mut ids: Vec<_> = server
        .messages(mailbox)
        .values()
        .map(|message| mailsync::envelope::content_id(&message.raw))
        .collect();
    ids.sort();
    ids
}

pub fn local_repo(root: &Path) -> MaildirRepository {
    MaildirRepository::new(Arc::new(MaildirConfig::new(root))).unwrap()
}

/// Removes the message matching the given identity from a Maildir.
pub fn remove_local(maildir: &Path, id: &str) {
    for dir in ["cur", "new"] {
        for entry in fs::read_dir(maildir.join(dir)).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().to_string_lossy().to_string();
            if name == id || name.starts_with(&format!("{id}:")) {
                fs::remove_file(entry.path()).unwrap();
                return;
            }
        }
    }
    panic!("cannot find local message {id}");
}
