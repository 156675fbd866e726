pub mod descriptor;
pub mod hooks;
pub mod ids;
pub mod images;
pub mod models;
pub mod order;
pub mod populate;
pub mod report;
pub mod xml;

pub use descriptor::{
    DescriptorConfig, DescriptorStore, EntityFields, FieldDescriptor, LangData, RowData,
    SeedDocument, SeedRow, SourceKind,
};
pub use hooks::{BackupHook, CreateHook, EntityHooks, ExportHook, HookTable, ImageHook, PopulateHook};
pub use ids::IdRegistry;
pub use images::{resize_to_fit, ImageError, ImageImporter};
pub use models::{ModelRegistry, ObjectModel, Saved, TableModel};
pub use order::DependencyGraph;
pub use populate::{EntitySummary, FixtureLoader, PopulateReport};
pub use report::write_run_report;
