use std::collections::HashMap;

/// How the rows of an entity are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateHook {
    Rows,
    Tags,
}

/// How a single row is persisted when the generic path is not wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateHook {
    Default,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageHook {
    Default,
    Scene,
    OrderState,
    Tab,
    ProductImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportHook {
    Rows,
    Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupHook {
    Default,
    Tab,
    ProductImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHooks {
    pub populate: PopulateHook,
    pub create: CreateHook,
    pub images: ImageHook,
    pub export: ExportHook,
    pub backup: BackupHook,
}

impl Default for EntityHooks {
    fn default() -> Self {
        Self {
            populate: PopulateHook::Rows,
            create: CreateHook::Default,
            images: ImageHook::Default,
            export: ExportHook::Rows,
            backup: BackupHook::Default,
        }
    }
}

/// Entity name to handler variants, fixed when the loader is built.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    entries: HashMap<String, EntityHooks>,
}

impl HookTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Handlers for the entities whose seed data needs bespoke treatment.
    pub fn standard() -> Self {
        let defaults = EntityHooks::default();
        let mut table = Self::empty();
        table.register(
            "tag",
            EntityHooks {
                populate: PopulateHook::Tags,
                export: ExportHook::Tags,
                ..defaults
            },
        );
        table.register(
            "configuration",
            EntityHooks {
                create: CreateHook::Configuration,
                ..defaults
            },
        );
        table.register(
            "scene",
            EntityHooks {
                images: ImageHook::Scene,
                ..defaults
            },
        );
        table.register(
            "order_state",
            EntityHooks {
                images: ImageHook::OrderState,
                ..defaults
            },
        );
        table.register(
            "tab",
            EntityHooks {
                images: ImageHook::Tab,
                backup: BackupHook::Tab,
                ..defaults
            },
        );
        table.register(
            "image",
            EntityHooks {
                images: ImageHook::ProductImage,
                backup: BackupHook::ProductImage,
                ..defaults
            },
        );
        table
    }

    pub fn register(&mut self, entity: &str, hooks: EntityHooks) {
        self.entries.insert(entity.to_string(), hooks);
    }

    pub fn hooks_for(&self, entity: &str) -> EntityHooks {
        self.entries.get(entity).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_entities_use_generic_handlers() {
        let table = HookTable::standard();
        assert_eq!(table.hooks_for("country"), EntityHooks::default());
    }

    #[test]
    fn bespoke_entities_are_routed() {
        let table = HookTable::standard();
        assert_eq!(table.hooks_for("tag").populate, PopulateHook::Tags);
        assert_eq!(table.hooks_for("tag").export, ExportHook::Tags);
        assert_eq!(table.hooks_for("configuration").create, CreateHook::Configuration);
        assert_eq!(table.hooks_for("order_state").images, ImageHook::OrderState);
        assert_eq!(table.hooks_for("tab").backup, BackupHook::Tab);
        assert_eq!(table.hooks_for("image").images, ImageHook::ProductImage);
        assert_eq!(table.hooks_for("scene").backup, BackupHook::Default);
    }
}
