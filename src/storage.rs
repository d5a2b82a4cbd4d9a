//! Sled-backed document store.
//!
//! Documents are schema-flexible JSON objects keyed `"{collection}/{id}"` in
//! one tree, which lets the enrollment relation (one field on the account,
//! one on the course) be updated inside a single sled transaction. Credentials
//! for the identity service live in a second tree keyed by normalised email.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sled::transaction::{
    abort, ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional};

use crate::error::{EnrollmentError, StoreError};
use crate::models::{Account, Collection, Course, Credential};

pub type Fields = Map<String, Value>;

/// Field name holding an account's course ids.
pub const REGISTERED_COURSES: &str = "registeredCourseIds";
/// Field name holding a course's roster.
pub const REGISTERED_STUDENTS: &str = "registeredStudentIds";

/// A stored document: its id plus the JSON object of its fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Build a document from a typed record, dropping the record's own `id`.
    pub fn encode<T: Serialize>(id: &str, record: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.to_owned(),
            fields: to_fields(record)?,
        })
    }

    /// Decode into a typed record with `id` merged into the fields.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_owned(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields))
    }
}

/// Serialize a record into a field map (anything but a JSON object is refused).
pub fn to_fields<T: Serialize>(record: &T) -> Result<Fields, serde_json::Error> {
    match serde_json::to_value(record)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        _ => Err(serde_json::Error::custom("document fields must be a JSON object")),
    }
}

/// One change to one field of a document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldUpdate {
    /// Overwrite the field.
    Set(Value),
    /// Add the value to an array field unless already present.
    SetAdd(Value),
    /// Remove every occurrence of the value from an array field.
    SetRemove(Value),
}

pub type FieldUpdates = BTreeMap<String, FieldUpdate>;

/// Apply updates in field-name order. A set-add on a missing or non-array
/// field replaces it with a one-element array; a set-remove on one leaves an
/// empty array.
pub fn apply_updates(fields: &mut Fields, updates: &FieldUpdates) {
    for (name, update) in updates {
        match update {
            FieldUpdate::Set(value) => {
                fields.insert(name.clone(), value.clone());
            }
            FieldUpdate::SetAdd(value) => match fields.get_mut(name) {
                Some(Value::Array(items)) => {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                _ => {
                    fields.insert(name.clone(), Value::Array(vec![value.clone()]));
                }
            },
            FieldUpdate::SetRemove(value) => match fields.get_mut(name) {
                Some(Value::Array(items)) => items.retain(|item| item != value),
                _ => {
                    fields.insert(name.clone(), Value::Array(Vec::new()));
                }
            },
        }
    }
}

/// The field that mirrors the enrollment relation on a collection's documents.
pub fn relation_field(collection: Collection) -> &'static str {
    match collection {
        Collection::Users => REGISTERED_COURSES,
        Collection::Courses => REGISTERED_STUDENTS,
    }
}

/// Check that `fields` decode as the collection's record type, so one bad
/// write can never make the whole collection unreadable.
pub fn check_shape(collection: Collection, id: &str, fields: &Fields) -> Result<(), String> {
    let mut record = fields.clone();
    record.insert("id".to_owned(), Value::String(id.to_owned()));
    let record = Value::Object(record);
    let decoded = match collection {
        Collection::Users => serde_json::from_value::<Account>(record).map(|_| ()),
        Collection::Courses => serde_json::from_value::<Course>(record).map(|_| ()),
    };
    decoded.map_err(|e| e.to_string())
}

fn array_contains(fields: &Fields, name: &str, value: &str) -> bool {
    matches!(fields.get(name), Some(Value::Array(items)) if items.iter().any(|item| item.as_str() == Some(value)))
}

fn array_len(fields: &Fields, name: &str) -> usize {
    match fields.get(name) {
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    }
}

fn doc_key(collection: Collection, id: &str) -> String {
    format!("{}/{}", collection, id)
}

fn credential_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Reasons a transaction gives up; mapped onto `StoreError` afterwards.
#[derive(Debug)]
enum Abort {
    Missing { collection: Collection, id: String },
    Exists { key: String },
    Corrupt { key: String },
    Invalid { key: String, reason: String },
    Rejected(EnrollmentError),
}

impl From<TransactionError<Abort>> for StoreError {
    fn from(err: TransactionError<Abort>) -> Self {
        match err {
            TransactionError::Abort(Abort::Missing { collection, id }) => StoreError::NotFound {
                collection: collection.as_str().to_owned(),
                id,
            },
            TransactionError::Abort(Abort::Exists { key }) => StoreError::Exists { key },
            TransactionError::Abort(Abort::Corrupt { key }) => StoreError::Corrupt { key },
            TransactionError::Abort(Abort::Invalid { key, reason }) => StoreError::Invalid { key, reason },
            TransactionError::Abort(Abort::Rejected(rule)) => StoreError::Rejected(rule),
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

fn reject(rule: EnrollmentError) -> ConflictableTransactionError<Abort> {
    ConflictableTransactionError::Abort(Abort::Rejected(rule))
}

fn tx_read(tx: &TransactionalTree, key: &str) -> ConflictableTransactionResult<Option<Fields>, Abort> {
    match tx.get(key.as_bytes())? {
        Some(bytes) => serde_json::from_slice::<Fields>(&bytes)
            .map(Some)
            .map_err(|_| ConflictableTransactionError::Abort(Abort::Corrupt { key: key.to_owned() })),
        None => Ok(None),
    }
}

fn tx_write(tx: &TransactionalTree, key: &str, fields: &Fields) -> ConflictableTransactionResult<(), Abort> {
    let bytes = serde_json::to_vec(fields)
        .map_err(|_| ConflictableTransactionError::Abort(Abort::Corrupt { key: key.to_owned() }))?;
    tx.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn tx_check(collection: Collection, id: &str, key: &str, fields: &Fields) -> ConflictableTransactionResult<(), Abort> {
    check_shape(collection, id, fields).map_err(|reason| {
        ConflictableTransactionError::Abort(Abort::Invalid {
            key: key.to_owned(),
            reason,
        })
    })
}

fn single(name: &str, value: &str, add: bool) -> FieldUpdates {
    let value = Value::String(value.to_owned());
    let update = if add {
        FieldUpdate::SetAdd(value)
    } else {
        FieldUpdate::SetRemove(value)
    };
    BTreeMap::from([(name.to_owned(), update)])
}

#[derive(Clone)] // Clone for sharing across REST handlers (sled handles are cheap to clone)
pub struct Storage {
    db: Db,
    doc_tree: sled::Tree,
    credential_tree: sled::Tree,
}

impl Storage {
    /// Open or create the sled database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop. Used by tests and local demos.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let doc_tree = db.open_tree("docs")?;
        let credential_tree = db.open_tree("credentials")?;
        Ok(Self {
            db,
            doc_tree,
            credential_tree,
        })
    }

    pub fn get_doc(&self, collection: Collection, id: &str) -> Result<Document, StoreError> {
        match self.doc_tree.get(doc_key(collection, id).as_bytes())? {
            Some(bytes) => Ok(Document {
                id: id.to_owned(),
                fields: serde_json::from_slice(&bytes)?,
            }),
            None => Err(StoreError::NotFound {
                collection: collection.as_str().to_owned(),
                id: id.to_owned(),
            }),
        }
    }

    /// Create or overwrite a document.
    pub fn set_doc(&self, collection: Collection, id: &str, fields: &Fields) -> Result<(), StoreError> {
        self.doc_tree
            .insert(doc_key(collection, id).as_bytes(), serde_json::to_vec(fields)?)?;
        Ok(())
    }

    /// Create a document under a fresh id and return the id. The new
    /// document starts with an empty relation field whatever `fields` says.
    pub fn add_doc(&self, collection: Collection, fields: &Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut fields = fields.clone();
        fields.insert(relation_field(collection).to_owned(), Value::Array(Vec::new()));
        check_shape(collection, &id, &fields).map_err(|reason| StoreError::Invalid {
            key: doc_key(collection, &id),
            reason,
        })?;
        self.set_doc(collection, &id, &fields)?;
        Ok(id)
    }

    /// Create or overwrite a document through the generic write path. The
    /// stored relation field survives the overwrite; a new document gets an
    /// empty one.
    pub fn replace_doc(&self, collection: Collection, id: &str, fields: &Fields) -> Result<(), StoreError> {
        let key = doc_key(collection, id);
        let relation = relation_field(collection);
        self.doc_tree.transaction(|tx| {
            let kept = tx_read(tx, &key)?
                .and_then(|mut stored| stored.remove(relation))
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let mut fields = fields.clone();
            fields.insert(relation.to_owned(), kept);
            tx_check(collection, id, &key, &fields)?;
            tx_write(tx, &key, &fields)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Read-modify-write of one existing document, atomically. The result
    /// must still decode as the collection's record type.
    pub fn update_doc(
        &self,
        collection: Collection,
        id: &str,
        updates: &FieldUpdates,
    ) -> Result<Document, StoreError> {
        let key = doc_key(collection, id);
        let fields = self.doc_tree.transaction(|tx| {
            let Some(mut fields) = tx_read(tx, &key)? else {
                return abort(Abort::Missing {
                    collection,
                    id: id.to_owned(),
                });
            };
            apply_updates(&mut fields, updates);
            tx_check(collection, id, &key, &fields)?;
            tx_write(tx, &key, &fields)?;
            Ok(fields)
        })?;
        Ok(Document {
            id: id.to_owned(),
            fields,
        })
    }

    /// All documents of a collection, in key order.
    pub fn list_docs(&self, collection: Collection) -> Result<Vec<Document>, StoreError> {
        let prefix = format!("{}/", collection);
        let mut docs = vec![];
        for item in self.doc_tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let id = key.strip_prefix(&prefix).unwrap_or(&key).to_owned();
            docs.push(Document {
                id,
                fields: serde_json::from_slice(&value)?,
            });
        }
        Ok(docs)
    }

    /// Decode a whole collection into typed records.
    pub fn list_records<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, StoreError> {
        let mut records = vec![];
        for doc in self.list_docs(collection)? {
            records.push(doc.decode()?);
        }
        Ok(records)
    }

    /// Register an account for a course: both sides of the relation or neither.
    ///
    /// Runs as one transaction over the documents tree, so concurrent
    /// registrants are serialised and the roster never exceeds capacity.
    pub fn enroll(&self, account_id: &str, course_id: &str) -> Result<(), StoreError> {
        let account_key = doc_key(Collection::Users, account_id);
        let course_key = doc_key(Collection::Courses, course_id);
        self.doc_tree.transaction(|tx| {
            let Some(mut account) = tx_read(tx, &account_key)? else {
                return Err(reject(EnrollmentError::NotAuthenticated));
            };
            let Some(mut course) = tx_read(tx, &course_key)? else {
                return Err(reject(EnrollmentError::CourseNotFound));
            };
            if course.get("active").and_then(Value::as_bool) == Some(false) {
                return Err(reject(EnrollmentError::CourseNotFound));
            }
            if array_contains(&account, REGISTERED_COURSES, course_id)
                || array_contains(&course, REGISTERED_STUDENTS, account_id)
            {
                return Err(reject(EnrollmentError::AlreadyRegistered));
            }
            let capacity = course.get("capacity").and_then(Value::as_u64).unwrap_or(0);
            if array_len(&course, REGISTERED_STUDENTS) as u64 >= capacity {
                return Err(reject(EnrollmentError::CourseFull));
            }
            apply_updates(&mut account, &single(REGISTERED_COURSES, course_id, true));
            apply_updates(&mut course, &single(REGISTERED_STUDENTS, account_id, true));
            tx_write(tx, &account_key, &account)?;
            tx_write(tx, &course_key, &course)?;
            Ok(())
        })?;
        tracing::debug!(account_id, course_id, "enrollment committed");
        Ok(())
    }

    /// Remove an account from a course, clearing both sides together.
    pub fn withdraw(&self, account_id: &str, course_id: &str) -> Result<(), StoreError> {
        let account_key = doc_key(Collection::Users, account_id);
        let course_key = doc_key(Collection::Courses, course_id);
        self.doc_tree.transaction(|tx| {
            let Some(mut account) = tx_read(tx, &account_key)? else {
                return Err(reject(EnrollmentError::NotAuthenticated));
            };
            let Some(mut course) = tx_read(tx, &course_key)? else {
                return Err(reject(EnrollmentError::CourseNotFound));
            };
            let on_account = array_contains(&account, REGISTERED_COURSES, course_id);
            let on_course = array_contains(&course, REGISTERED_STUDENTS, account_id);
            if !on_account && !on_course {
                return Err(reject(EnrollmentError::NotRegistered));
            }
            apply_updates(&mut account, &single(REGISTERED_COURSES, course_id, false));
            apply_updates(&mut course, &single(REGISTERED_STUDENTS, account_id, false));
            tx_write(tx, &account_key, &account)?;
            tx_write(tx, &course_key, &course)?;
            Ok(())
        })?;
        tracing::debug!(account_id, course_id, "withdrawal committed");
        Ok(())
    }

    // --- Credentials (identity service) ---

    pub fn get_credential(&self, email: &str) -> Result<Option<Credential>, StoreError> {
        match self.credential_tree.get(credential_key(email).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a new credential and its profile document in one transaction.
    /// Fails with `StoreError::Exists` when the email is already taken.
    pub fn create_account(&self, credential: &Credential, profile: &Fields) -> Result<(), StoreError> {
        let cred_key = credential_key(&credential.email);
        let profile_key = doc_key(Collection::Users, &credential.account_id);
        let cred_bytes = serde_json::to_vec(credential)?;
        let profile_bytes = serde_json::to_vec(profile)?;
        (&self.credential_tree, &self.doc_tree).transaction(|(creds, docs)| {
            if creds.get(cred_key.as_bytes())?.is_some() {
                return abort(Abort::Exists {
                    key: cred_key.clone(),
                });
            }
            creds.insert(cred_key.as_bytes(), cred_bytes.as_slice())?;
            docs.insert(profile_key.as_bytes(), profile_bytes.as_slice())?;
            Ok(())
        })?;
        Ok(())
    }

    /// Replace the stored credential for its email.
    pub fn put_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.credential_tree.insert(
            credential_key(&credential.email).as_bytes(),
            serde_json::to_vec(credential)?,
        )?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
