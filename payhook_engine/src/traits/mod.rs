mod reconciler_database;

pub use reconciler_database::{ReconcilerDatabase, ReconcilerError, UNDERPAYMENT_THRESHOLD_PERCENT};
