/// Fjall-based persistence for committed file records
///
/// The ledger is the metadata side of the "no metadata without a backend
/// object" invariant. It is written only after the backend has been checked
/// (commit) or after the backend object is gone (delete). It persists:
///
/// - File records (storage identifier, size, checksum, descriptive metadata)
/// - A storage identifier -> file id index, so an identifier is committed once
/// - Tombstones for deleted ids, so a repeated delete is a no-op
/// - The file id counter
///
/// ## Usage
///
/// ```rust,ignore
/// use dvstore::ledger::FileLedger;
///
/// let ledger = FileLedger::open("data/ledger")?;
/// let record = ledger.commit(record)?;
/// let again = ledger.get(record.id)?;
/// ```

pub mod error;
pub mod keys;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{FileLedger, LedgerStats, Removal};
