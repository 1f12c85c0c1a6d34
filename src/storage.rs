//!
//! techmarket storage module
//! --------------------------
//! File-backed store for the marketplace: one JSON document per entity
//! collection (`users.json`, `listings.json`) under a configured root folder.
//! Every read loads current disk state; there is no in-process caching of
//! users, tokens or ownership, so each authorization check observes the
//! latest truth.
//!
//! Key responsibilities:
//! - User rows with unique, case-normalized emails and Argon2 PHC hashes.
//! - Listing rows carrying the canonical `seller_id` ownership field.
//! - Owner-conditional mutations (`update/delete where id=X and seller_id=Y`)
//!   performed as a single load/check/write sequence while the caller holds
//!   the store lock.
//!
//! The public API centers around the `Store` type, which is wrapped in a
//! thread-safe `SharedStore` (`Arc<Mutex<Store>>`) elsewhere in the codebase.

use std::{fs, path::{Path, PathBuf}};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A registered user row as persisted on disk. The `password_hash` is an
/// Argon2 PHC string and never leaves the storage/identity layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A marketplace listing. `seller_id` is the single canonical ownership
/// field; guards and conditional writes compare against it and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub seller_id: i64,
    pub title: String,
    pub price_cents: i64,
    pub condition: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub title: String,
    pub price_cents: i64,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Partial update for a listing; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Outcome of an owner-conditional mutation. The ownership re-check happens
/// inside the same lock-held load/write sequence as the mutation itself, so a
/// delete or re-own racing the guard still resolves here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedMutation<T> {
    Applied(T),
    Missing,
    NotOwner,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    next_id: i64,
    users: Vec<UserRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ListingsFile {
    next_id: i64,
    listings: Vec<Listing>,
}

/// Core on-disk storage handle for a techmarket data root.
#[derive(Clone)]
pub struct Store {
    /// Root folder holding users.json and listings.json.
    root: PathBuf,
}

impl Store {
    /// Create a new Store rooted at the given filesystem path.
    /// The directory is created if it does not already exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create or access data root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Return the configured root folder for this Store.
    pub fn root_path(&self) -> &PathBuf { &self.root }

    fn users_path(&self) -> PathBuf { self.root.join("users.json") }
    fn listings_path(&self) -> PathBuf { self.root.join("listings.json") }

    fn load_users(&self) -> Result<UsersFile> {
        let p = self.users_path();
        if !p.exists() {
            return Ok(UsersFile { next_id: 1, users: Vec::new() });
        }
        let text = fs::read_to_string(&p)
            .with_context(|| format!("reading {}", p.display()))?;
        let file: UsersFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", p.display()))?;
        Ok(file)
    }

    fn save_users(&self, file: &UsersFile) -> Result<()> {
        let p = self.users_path();
        fs::write(&p, serde_json::to_string_pretty(file)?)
            .with_context(|| format!("writing {}", p.display()))?;
        Ok(())
    }

    fn load_listings(&self) -> Result<ListingsFile> {
        let p = self.listings_path();
        if !p.exists() {
            return Ok(ListingsFile { next_id: 1, listings: Vec::new() });
        }
        let text = fs::read_to_string(&p)
            .with_context(|| format!("reading {}", p.display()))?;
        let file: ListingsFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", p.display()))?;
        // seller_id is the ownership source of truth; a non-positive value
        // means the row was written by something broken. Fail loudly rather
        // than letting an ownership comparison silently pass or fail.
        for l in &file.listings {
            if l.seller_id <= 0 {
                anyhow::bail!("listing {} has invalid seller_id {}", l.id, l.seller_id);
            }
        }
        Ok(file)
    }

    fn save_listings(&self, file: &ListingsFile) -> Result<()> {
        let p = self.listings_path();
        fs::write(&p, serde_json::to_string_pretty(file)?)
            .with_context(|| format!("writing {}", p.display()))?;
        Ok(())
    }

    // --- users ---

    /// Look up a user by case-normalized email. The caller is expected to
    /// normalize; this compares exactly.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let file = self.load_users()?;
        Ok(file.users.into_iter().find(|u| u.email == email))
    }

    pub fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let file = self.load_users()?;
        Ok(file.users.into_iter().find(|u| u.id == id))
    }

    /// Insert a new user row and return it with its assigned id.
    /// Uniqueness of the email must be checked by the caller while holding
    /// the store lock; this method only appends.
    pub fn insert_user(
        &self,
        name: Option<String>,
        email: String,
        password_hash: String,
    ) -> Result<UserRecord> {
        let mut file = self.load_users()?;
        let rec = UserRecord {
            id: file.next_id,
            name,
            email,
            password_hash,
            created_at: Utc::now(),
        };
        file.next_id += 1;
        file.users.push(rec.clone());
        self.save_users(&file)?;
        debug!(target: "techmarket::storage", "insert_user: id={} email={}", rec.id, rec.email);
        Ok(rec)
    }

    // --- listings ---

    pub fn list_listings(&self, category: Option<&str>) -> Result<Vec<Listing>> {
        let file = self.load_listings()?;
        let mut out: Vec<Listing> = match category {
            Some(c) => file
                .listings
                .into_iter()
                .filter(|l| l.category.as_deref() == Some(c))
                .collect(),
            None => file.listings,
        };
        // newest first, matching the browse page ordering
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn get_listing(&self, id: i64) -> Result<Option<Listing>> {
        let file = self.load_listings()?;
        Ok(file.listings.into_iter().find(|l| l.id == id))
    }

    /// Fresh read of a listing's owning user id. Never cached.
    pub fn listing_owner(&self, id: i64) -> Result<Option<i64>> {
        Ok(self.get_listing(id)?.map(|l| l.seller_id))
    }

    pub fn insert_listing(&self, seller_id: i64, new: NewListing) -> Result<Listing> {
        let mut file = self.load_listings()?;
        let listing = Listing {
            id: file.next_id,
            seller_id,
            title: new.title,
            price_cents: new.price_cents,
            condition: new.condition,
            category: new.category,
            brand: new.brand,
            image_url: new.image_url,
            created_at: Utc::now(),
        };
        file.next_id += 1;
        file.listings.push(listing.clone());
        self.save_listings(&file)?;
        debug!(target: "techmarket::storage", "insert_listing: id={} seller_id={}", listing.id, listing.seller_id);
        Ok(listing)
    }

    /// Apply `changes` to the listing only if it still exists and is still
    /// owned by `seller_id`. The check and the write share one load/save pass
    /// under the caller-held store lock.
    pub fn update_listing_owned(
        &self,
        id: i64,
        seller_id: i64,
        changes: ListingUpdate,
    ) -> Result<OwnedMutation<Listing>> {
        let mut file = self.load_listings()?;
        let Some(listing) = file.listings.iter_mut().find(|l| l.id == id) else {
            return Ok(OwnedMutation::Missing);
        };
        if listing.seller_id != seller_id {
            return Ok(OwnedMutation::NotOwner);
        }
        if let Some(v) = changes.title { listing.title = v; }
        if let Some(v) = changes.price_cents { listing.price_cents = v; }
        if let Some(v) = changes.condition { listing.condition = Some(v); }
        if let Some(v) = changes.category { listing.category = Some(v); }
        if let Some(v) = changes.brand { listing.brand = Some(v); }
        if let Some(v) = changes.image_url { listing.image_url = Some(v); }
        let updated = listing.clone();
        self.save_listings(&file)?;
        debug!(target: "techmarket::storage", "update_listing_owned: id={} seller_id={}", id, seller_id);
        Ok(OwnedMutation::Applied(updated))
    }

    /// Delete the listing only if it still exists and is still owned by
    /// `seller_id`.
    pub fn delete_listing_owned(&self, id: i64, seller_id: i64) -> Result<OwnedMutation<()>> {
        let mut file = self.load_listings()?;
        let Some(pos) = file.listings.iter().position(|l| l.id == id) else {
            return Ok(OwnedMutation::Missing);
        };
        if file.listings[pos].seller_id != seller_id {
            return Ok(OwnedMutation::NotOwner);
        }
        file.listings.remove(pos);
        self.save_listings(&file)?;
        debug!(target: "techmarket::storage", "delete_listing_owned: id={} seller_id={}", id, seller_id);
        Ok(OwnedMutation::Applied(()))
    }
}

/// Thread-safe shared handle over the Store. Request handlers lock it for
/// the duration of each storage operation; there is no other shared mutable
/// state on the server.
#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Store::new(root)?))))
    }
}
