//! # Storage Module
//!
//! Sled-backed persistence for bulletins, mail and the channel directory.
//!
//! Each entity is a `Table` of three trees:
//!
//! | Tree | Key | Value |
//! |---|---|---|
//! | `<table>` | local id (big-endian) | bincode record |
//! | `<table>_uids` | unique id | local id |
//! | `<table>_deleted` | unique id | deletion time (unix seconds) |
//!
//! A create claims the unique id and writes the record in one transaction
//! over all three trees, so concurrent creates of one id yield one record.
//! A delete removes the index entry and the record and leaves a tombstone in
//! the same transaction. Replicated creates for a tombstoned id are ignored,
//! which keeps a rebroadcast create from resurrecting a deleted record.
//!
//! ## Replication
//!
//! Mutations carry an [`Origin`]. Only [`Origin::Local`] mutations are handed
//! to the [`Replicator`]; replicated ones are applied silently so peers never
//! echo events back and forth.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{IVec, Transactional};
use uuid::Uuid;

use crate::errors::{BbsError, BbsResult};
use crate::logutil::escape_log;
use crate::mesh::Outbox;
use crate::sync::codec::{BulletinRecord, ChannelRecord, MailRecord, SyncEvent};
use crate::sync::Replicator;
use crate::validation::{
    sanitize_short_name, validate_board_name, validate_body, validate_channel_name,
    validate_channel_url, validate_node_id, validate_subject, validate_unique_id,
};

const TABLE_BULLETINS: &str = "bulletins";
const TABLE_MAIL: &str = "mail";
const TABLE_CHANNELS: &str = "channels";

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A user on this node; replicated to peers.
    Local,
    /// Applied from a peer's sync event; never re-replicated.
    Replicated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bulletin {
    pub local_id: u64,
    pub board: String,
    /// Node id of the poster when posted here; replicated bulletins only carry a short name.
    pub sender_id: Option<String>,
    pub sender_short_name: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

impl Bulletin {
    /// Whether `node_id` (displayed as `short_name`) may delete this bulletin.
    pub fn is_owned_by(&self, node_id: &str, short_name: &str) -> bool {
        match &self.sender_id {
            Some(id) => id == node_id,
            None => self.sender_short_name.eq_ignore_ascii_case(short_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mail {
    pub local_id: u64,
    pub sender_id: String,
    pub sender_short_name: String,
    pub recipient_id: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub local_id: u64,
    pub name: String,
    pub url: String,
    pub unique_id: String,
}

/// Input for [`Store::create_bulletin`].
#[derive(Debug, Clone)]
pub struct NewBulletin {
    pub board: String,
    pub sender_id: Option<String>,
    pub sender_short_name: String,
    pub subject: String,
    pub content: String,
    /// Pre-assigned id when applying a replicated create.
    pub unique_id: Option<String>,
}

/// Input for [`Store::create_mail`].
#[derive(Debug, Clone)]
pub struct NewMail {
    pub sender_id: String,
    pub sender_short_name: String,
    pub recipient_id: String,
    pub subject: String,
    pub content: String,
    pub unique_id: Option<String>,
}

/// Result of a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created<T> {
    /// Written by this call.
    New(T),
    /// The unique id was already stored; this is that record.
    Existing(T),
    /// The unique id was deleted earlier; nothing was written.
    Deleted,
}

impl<T> Created<T> {
    pub fn record(&self) -> Option<&T> {
        match self {
            Created::New(r) | Created::Existing(r) => Some(r),
            Created::Deleted => None,
        }
    }

    pub fn into_record(self) -> Option<T> {
        match self {
            Created::New(r) | Created::Existing(r) => Some(r),
            Created::Deleted => None,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}

/// Entity totals for the Stats menu and the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub bulletins_by_board: Vec<(String, usize)>,
    pub mail: usize,
    pub channels: usize,
}

impl StoreCounts {
    pub fn bulletins(&self) -> usize {
        self.bulletins_by_board.iter().map(|(_, n)| n).sum()
    }
}

/// Channel entries have no id on the wire, so every node derives the same one from the content.
pub fn channel_unique_id(name: &str, url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}|{}", name, url).as_bytes()).to_string()
}

/// Outcome of claiming a unique id inside a transaction.
enum Claim<T> {
    Inserted,
    Existing(T),
    Tombstoned,
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn key_id(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> BbsResult<T> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

fn abort<E: Into<BbsError>>(e: E) -> ConflictableTransactionError<BbsError> {
    ConflictableTransactionError::Abort(e.into())
}

/// Records of one entity with their unique-id index and tombstones.
#[derive(Clone)]
struct Table {
    records: sled::Tree,
    uids: sled::Tree,
    tombstones: sled::Tree,
}

impl Table {
    fn open(db: &sled::Db, name: &str) -> BbsResult<Self> {
        Ok(Self {
            records: db.open_tree(name)?,
            uids: db.open_tree(format!("{}_uids", name))?,
            tombstones: db.open_tree(format!("{}_deleted", name))?,
        })
    }

    fn load<T: DeserializeOwned>(&self, id: u64) -> BbsResult<Option<T>> {
        match self.records.get(id_key(id))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self) -> BbsResult<Vec<T>> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn by_uid<T: DeserializeOwned>(&self, uid: &str) -> BbsResult<Option<T>> {
        match self.uids.get(uid.as_bytes())?.as_deref().and_then(key_id) {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    fn is_tombstoned(&self, uid: &str) -> BbsResult<bool> {
        Ok(self.tombstones.contains_key(uid.as_bytes())?)
    }

    /// Claim `uid` for `record` (stored under `local_id`) and write it, atomically.
    /// With `honor_tombstone` a previously deleted id is refused; otherwise the
    /// tombstone is cleared.
    fn insert_unique<T: Serialize + DeserializeOwned>(
        &self,
        uid: &str,
        local_id: u64,
        record: &T,
        honor_tombstone: bool,
    ) -> BbsResult<Claim<T>> {
        let key = id_key(local_id);
        let bytes = bincode::serialize(record)?;
        let claim = (&self.uids, &self.records, &self.tombstones).transaction(
            |(uids, records, tombstones)| -> ConflictableTransactionResult<Claim<T>, BbsError> {
                if tombstones.get(uid.as_bytes())?.is_some() {
                    if honor_tombstone {
                        return Ok(Claim::Tombstoned);
                    }
                    tombstones.remove(uid.as_bytes())?;
                }
                if let Some(existing) = uids.get(uid.as_bytes())?.as_deref().and_then(key_id) {
                    if let Some(stored) = records.get(&id_key(existing)[..])? {
                        let stored: T = deserialize(&stored).map_err(abort)?;
                        return Ok(Claim::Existing(stored));
                    }
                }
                uids.insert(uid.as_bytes(), &key[..])?;
                records.insert(&key[..], bytes.as_slice())?;
                Ok(Claim::Inserted)
            },
        )?;
        Ok(claim)
    }

    /// Remove the record indexed by `uid` and tombstone the id, atomically.
    /// Returns whether a record was indexed under `uid`.
    fn remove_unique(&self, uid: &str) -> BbsResult<bool> {
        let stamp = Utc::now().timestamp().to_be_bytes();
        let removed = (&self.uids, &self.records, &self.tombstones).transaction(
            |(uids, records, tombstones)| -> ConflictableTransactionResult<bool, BbsError> {
                tombstones.insert(uid.as_bytes(), &stamp[..])?;
                let Some(id) = uids.remove(uid.as_bytes())? else {
                    return Ok(false);
                };
                if let Some(id) = key_id(&id) {
                    records.remove(&id_key(id)[..])?;
                }
                Ok(true)
            },
        )?;
        Ok(removed)
    }

    fn prune_tombstones(&self, cutoff: DateTime<Utc>) -> BbsResult<usize> {
        let cutoff = cutoff.timestamp();
        let mut pruned = 0;
        for entry in self.tombstones.iter() {
            let (uid, stamp): (IVec, IVec) = entry?;
            let deleted_at = <[u8; 8]>::try_from(stamp.as_ref())
                .map(i64::from_be_bytes)
                .unwrap_or(0);
            if deleted_at < cutoff {
                self.tombstones.remove(uid)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

/// Builder so the server can attach replication and urgent broadcasts while tests open bare stores.
pub struct StoreBuilder {
    path: PathBuf,
    replicator: Option<Replicator>,
    urgent: Option<(String, Outbox)>,
}

impl StoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            replicator: None,
            urgent: None,
        }
    }

    pub fn replicator(mut self, replicator: Replicator) -> Self {
        self.replicator = Some(replicator);
        self
    }

    /// Announce local posts to `board` on the broadcast channel.
    pub fn urgent_broadcast(mut self, board: &str, outbox: Outbox) -> Self {
        self.urgent = Some((board.to_string(), outbox));
        self
    }

    pub fn open(self) -> BbsResult<Store> {
        let mut store = Store::open(&self.path)?;
        store.replicator = self.replicator;
        store.urgent = self.urgent;
        Ok(store)
    }
}

/// Handle to the durable store. Clones share the same database; hand each
/// concurrent context its own clone.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    bulletins: Table,
    mail: Table,
    channels: Table,
    replicator: Option<Replicator>,
    urgent: Option<(String, Outbox)>,
}

impl Store {
    /// Open (or create) a store rooted at `path` with no replication attached.
    pub fn open<P: AsRef<Path>>(path: P) -> BbsResult<Self> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            bulletins: Table::open(&db, TABLE_BULLETINS)?,
            mail: Table::open(&db, TABLE_MAIL)?,
            channels: Table::open(&db, TABLE_CHANNELS)?,
            db,
            replicator: None,
            urgent: None,
        };
        debug!("store opened at {}", path_ref.display());
        Ok(store)
    }

    fn next_id(&self) -> BbsResult<u64> {
        // sled ids start at 0; keep 0 free so user-facing numbers start at 1
        Ok(self.db.generate_id()? + 1)
    }

    fn unique_id_or_new(supplied: Option<String>) -> BbsResult<String> {
        match supplied {
            Some(uid) => Ok(validate_unique_id(&uid)?),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }

    fn replicate(&self, origin: Origin, event: SyncEvent) {
        if origin != Origin::Local {
            return;
        }
        if let Some(replicator) = &self.replicator {
            replicator.fan_out(&event);
        }
    }

    pub fn replicator(&self) -> Option<&Replicator> {
        self.replicator.as_ref()
    }

    pub fn flush(&self) -> BbsResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Drop tombstones older than `max_age`. Returns how many were removed.
    pub fn prune_tombstones(&self, max_age: Duration) -> BbsResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut pruned = 0;
        for table in [&self.bulletins, &self.mail, &self.channels] {
            pruned += table.prune_tombstones(cutoff)?;
        }
        Ok(pruned)
    }

    // ---------------------------------------------------------------- bulletins

    pub fn create_bulletin(&self, new: NewBulletin, origin: Origin) -> BbsResult<Created<Bulletin>> {
        let board = validate_board_name(&new.board)?;
        let subject = validate_subject(&new.subject)?;
        let content = validate_body(&new.content)?;
        let sender_short_name = sanitize_short_name(&new.sender_short_name);
        let unique_id = Self::unique_id_or_new(new.unique_id)?;

        let local_id = self.next_id()?;
        let record = Bulletin {
            local_id,
            board,
            sender_id: new.sender_id,
            sender_short_name,
            date: Utc::now(),
            subject,
            content,
            unique_id,
        };
        let honor_tombstone = origin == Origin::Replicated;
        match self
            .bulletins
            .insert_unique(&record.unique_id, local_id, &record, honor_tombstone)?
        {
            Claim::Existing(stored) => {
                debug!("bulletin {} already stored as #{}", escape_log(&stored.unique_id), stored.local_id);
                return Ok(Created::Existing(stored));
            }
            Claim::Tombstoned => {
                debug!("bulletin {} was deleted; create ignored", escape_log(&record.unique_id));
                return Ok(Created::Deleted);
            }
            Claim::Inserted => {}
        }
        info!(
            "bulletin #{} on {} by {} ({:?})",
            local_id, record.board, record.sender_short_name, origin
        );

        self.replicate(
            origin,
            SyncEvent::Bulletin(BulletinRecord {
                board: record.board.clone(),
                sender_short_name: record.sender_short_name.clone(),
                subject: record.subject.clone(),
                content: record.content.clone(),
                unique_id: record.unique_id.clone(),
            }),
        );
        if origin == Origin::Local {
            self.announce_urgent(&record);
        }
        Ok(Created::New(record))
    }

    fn announce_urgent(&self, bulletin: &Bulletin) {
        let Some((board, outbox)) = &self.urgent else {
            return;
        };
        if !bulletin.board.eq_ignore_ascii_case(board) {
            return;
        }
        let text = format!(
            "💥NEW URGENT BULLETIN💥\nFrom: {}\nTitle: {}",
            bulletin.sender_short_name, bulletin.subject
        );
        if let Err(e) = outbox.broadcast(&text) {
            warn!("urgent broadcast for bulletin #{} failed: {}", bulletin.local_id, e);
        }
    }

    /// Bulletins on `board` (case-insensitive), oldest first.
    pub fn list_bulletins(&self, board: &str) -> BbsResult<Vec<Bulletin>> {
        Ok(self
            .bulletins
            .scan::<Bulletin>()?
            .into_iter()
            .filter(|b| b.board.eq_ignore_ascii_case(board))
            .collect())
    }

    pub fn get_bulletin(&self, local_id: u64) -> BbsResult<Bulletin> {
        self.bulletins
            .load(local_id)?
            .ok_or_else(|| BbsError::NotFound(format!("bulletin #{}", local_id)))
    }

    /// Delete by local id. Ownership is checked by the caller before this point.
    pub fn delete_bulletin(&self, local_id: u64, origin: Origin) -> BbsResult<Bulletin> {
        let record = self.get_bulletin(local_id)?;
        if !self.bulletins.remove_unique(&record.unique_id)? {
            return Err(BbsError::NotFound(format!("bulletin #{}", local_id)));
        }
        info!("bulletin #{} ({}) deleted ({:?})", local_id, record.unique_id, origin);
        self.replicate(
            origin,
            SyncEvent::DeleteBulletin {
                unique_id: record.unique_id.clone(),
            },
        );
        Ok(record)
    }

    /// Delete by unique id. An unknown id is not an error; returns whether a record was removed.
    /// The id is tombstoned either way, so a create arriving after its delete stays deleted.
    pub fn delete_bulletin_by_uid(&self, unique_id: &str, origin: Origin) -> BbsResult<bool> {
        if !self.bulletins.remove_unique(unique_id)? {
            debug!("delete bulletin {}: already absent", escape_log(unique_id));
            return Ok(false);
        }
        info!("bulletin {} deleted ({:?})", escape_log(unique_id), origin);
        self.replicate(
            origin,
            SyncEvent::DeleteBulletin {
                unique_id: unique_id.to_string(),
            },
        );
        Ok(true)
    }

    // --------------------------------------------------------------------- mail

    pub fn create_mail(&self, new: NewMail, origin: Origin) -> BbsResult<Created<Mail>> {
        let sender_id = validate_node_id(&new.sender_id)?;
        let recipient_id = validate_node_id(&new.recipient_id)?;
        let subject = validate_subject(&new.subject)?;
        let content = validate_body(&new.content)?;
        let sender_short_name = sanitize_short_name(&new.sender_short_name);
        let unique_id = Self::unique_id_or_new(new.unique_id)?;

        let local_id = self.next_id()?;
        let record = Mail {
            local_id,
            sender_id,
            sender_short_name,
            recipient_id,
            date: Utc::now(),
            subject,
            content,
            unique_id,
        };
        let honor_tombstone = origin == Origin::Replicated;
        match self
            .mail
            .insert_unique(&record.unique_id, local_id, &record, honor_tombstone)?
        {
            Claim::Existing(stored) => {
                debug!("mail {} already stored as #{}", escape_log(&stored.unique_id), stored.local_id);
                return Ok(Created::Existing(stored));
            }
            Claim::Tombstoned => {
                debug!("mail {} was deleted; create ignored", escape_log(&record.unique_id));
                return Ok(Created::Deleted);
            }
            Claim::Inserted => {}
        }
        info!(
            "mail #{} {} -> {} ({:?})",
            local_id, record.sender_id, record.recipient_id, origin
        );

        self.replicate(
            origin,
            SyncEvent::Mail(MailRecord {
                sender_id: record.sender_id.clone(),
                sender_short_name: record.sender_short_name.clone(),
                recipient_id: record.recipient_id.clone(),
                subject: record.subject.clone(),
                content: record.content.clone(),
                unique_id: record.unique_id.clone(),
            }),
        );
        Ok(Created::New(record))
    }

    /// Mail addressed to `recipient_id`, oldest first.
    pub fn list_mail(&self, recipient_id: &str) -> BbsResult<Vec<Mail>> {
        Ok(self
            .mail
            .scan::<Mail>()?
            .into_iter()
            .filter(|m| m.recipient_id == recipient_id)
            .collect())
    }

    /// A mail by local id, visible only to its recipient.
    pub fn get_mail(&self, local_id: u64, recipient_id: &str) -> BbsResult<Mail> {
        match self.mail.load::<Mail>(local_id)? {
            Some(m) if m.recipient_id == recipient_id => Ok(m),
            _ => Err(BbsError::NotFound(format!("mail #{}", local_id))),
        }
    }

    /// Delete a mail on behalf of `requester_id`.
    ///
    /// The recipient is read from the stored record, never taken from the
    /// request. A missing record is `NotFound`, a different recipient is
    /// `Unauthorized`; neither mutates or replicates anything.
    pub fn delete_mail(&self, unique_id: &str, requester_id: &str) -> BbsResult<()> {
        let record: Mail = self
            .mail
            .by_uid(unique_id)?
            .ok_or_else(|| BbsError::NotFound(format!("mail {}", escape_log(unique_id))))?;
        if record.recipient_id != requester_id {
            return Err(BbsError::Unauthorized(format!(
                "{} cannot delete mail addressed to {}",
                requester_id, record.recipient_id
            )));
        }
        if !self.mail.remove_unique(unique_id)? {
            // lost a race with another delete of the same id
            debug!("mail {} removed concurrently", escape_log(unique_id));
            return Ok(());
        }
        info!("mail #{} ({}) deleted by {}", record.local_id, unique_id, requester_id);
        self.replicate(
            Origin::Local,
            SyncEvent::DeleteMail {
                unique_id: unique_id.to_string(),
            },
        );
        Ok(())
    }

    /// Apply a peer's mail delete. The origin already authorized it; an unknown id is a no-op
    /// but is still tombstoned.
    pub fn delete_mail_replicated(&self, unique_id: &str) -> BbsResult<bool> {
        let removed = self.mail.remove_unique(unique_id)?;
        if removed {
            info!("mail {} deleted (Replicated)", escape_log(unique_id));
        } else {
            debug!("delete mail {}: already absent", escape_log(unique_id));
        }
        Ok(removed)
    }

    // ----------------------------------------------------------------- channels

    /// A replicated entry that was deleted here stays deleted; posting it
    /// again locally restores it.
    pub fn create_channel(&self, name: &str, url: &str, origin: Origin) -> BbsResult<Created<Channel>> {
        let name = validate_channel_name(name)?;
        let url = validate_channel_url(url)?;
        let unique_id = channel_unique_id(&name, &url);

        let local_id = self.next_id()?;
        let record = Channel {
            local_id,
            name,
            url,
            unique_id,
        };
        let honor_tombstone = origin == Origin::Replicated;
        match self
            .channels
            .insert_unique(&record.unique_id, local_id, &record, honor_tombstone)?
        {
            Claim::Existing(stored) => return Ok(Created::Existing(stored)),
            Claim::Tombstoned => {
                debug!("channel '{}' was deleted; create ignored", escape_log(&record.name));
                return Ok(Created::Deleted);
            }
            Claim::Inserted => {}
        }
        info!("channel #{} '{}' added ({:?})", local_id, escape_log(&record.name), origin);

        self.replicate(
            origin,
            SyncEvent::Channel(ChannelRecord {
                name: record.name.clone(),
                url: record.url.clone(),
            }),
        );
        Ok(Created::New(record))
    }

    pub fn list_channels(&self) -> BbsResult<Vec<Channel>> {
        self.channels.scan()
    }

    /// Remove a directory entry on this node only; channel deletes are not replicated.
    pub fn delete_channel(&self, local_id: u64) -> BbsResult<Channel> {
        let record: Channel = self
            .channels
            .load(local_id)?
            .ok_or_else(|| BbsError::NotFound(format!("channel #{}", local_id)))?;
        if !self.channels.remove_unique(&record.unique_id)? {
            return Err(BbsError::NotFound(format!("channel #{}", local_id)));
        }
        info!("channel #{} '{}' removed", local_id, escape_log(&record.name));
        Ok(record)
    }

    // -------------------------------------------------------------------- stats

    /// Totals per configured board plus any board only known from replication.
    pub fn counts(&self, boards: &[String]) -> BbsResult<StoreCounts> {
        let mut by_board: Vec<(String, usize)> = boards.iter().map(|b| (b.clone(), 0)).collect();
        for bulletin in self.bulletins.scan::<Bulletin>()? {
            match by_board
                .iter_mut()
                .find(|(name, _)| name.eq_ignore_ascii_case(&bulletin.board))
            {
                Some((_, n)) => *n += 1,
                None => by_board.push((bulletin.board, 1)),
            }
        }
        Ok(StoreCounts {
            bulletins_by_board: by_board,
            mail: self.mail.len(),
            channels: self.channels.len(),
        })
    }
}
