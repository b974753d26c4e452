pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
pub mod metadata;
pub mod pipeline;
pub mod preprocess;
pub mod scan;
pub mod searcher;
pub mod storage;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use extractor::{Extractor, GridPoolExtractor};
pub use index::{FlatL2Index, Neighbor};
pub use metadata::{ImageRecord, MetadataStore, RecordFactory, StagedCopies};
pub use pipeline::{BuildOptions, BuildOutcome, IndexBuilder};
pub use preprocess::Preprocessor;
pub use scan::CorpusScanner;
pub use searcher::{Match, Searcher};
pub use storage::{IndexProfile, SimilarityIndex};
