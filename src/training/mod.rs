//! Offline feedback loop: derive labels from user feedback and assemble the
//! corpus the external trainer consumes. Finished trainings are recorded in
//! the model history with `record-training`.

pub mod dataset;
pub mod labeler;

pub use dataset::{assemble, merge, read_corpus, write_corpus, AssemblyReport, LabeledExample};
pub use labeler::{derive_labels, label_for};
