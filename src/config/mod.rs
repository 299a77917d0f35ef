pub mod settings;

pub use settings::{
    Config, DatabaseConfig, FetchConfig, NotifierConfig, PipelineConfig, ProtocolConfig, ProtocolKind,
    SourceConfig,
};
