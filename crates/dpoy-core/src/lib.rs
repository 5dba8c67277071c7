// Library root: the table model, the merge/derive/rank stages and the
// pipeline driver that chains them. The `dpoy` binary and the integration
// tests use this public API.

pub mod config;
pub mod derive;
pub mod join;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod reconcile;
pub mod sources;
pub mod table;
