use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use walkdir::WalkDir;

use super::Exporter;
use crate::db::quote_ident;
use crate::error::LoaderResult;
use crate::import::images::{image_scope, product_image_folder};

/// `<id>[-<type>].<ext>` file names of the live image tree.
fn backup_pattern(types: &[String]) -> Result<Regex, regex::Error> {
    let variants = if types.is_empty() {
        String::new()
    } else {
        let names: Vec<String> = types.iter().map(|t| regex::escape(t)).collect();
        format!("(?P<type>-(?:{}))?", names.join("|"))
    };
    RegexBuilder::new(&format!(
        r"^(?P<id>[0-9]+){variants}\.(?P<ext>gif|jpg|jpeg|png)$"
    ))
    .case_insensitive(true)
    .build()
}

fn ensure_dir(dir: &Path) -> bool {
    dir.is_dir() || fs::create_dir_all(dir).is_ok()
}

impl Exporter {
    fn image_type_names(&self, scope: Option<&str>) -> Vec<String> {
        scope
            .map(|scope| {
                self.config
                    .image_types_for(scope)
                    .into_iter()
                    .map(|t| t.name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mirror `<live>/<dir>/<id>[-type].<ext>` into the seed image tree under
    /// the row's symbolic identifier.
    pub fn backup_images(&mut self, entity: &str, dirs: &str) {
        let types = self.image_type_names(image_scope(entity));
        let pattern = match backup_pattern(&types) {
            Ok(pattern) => pattern,
            Err(err) => {
                self.errors.push(format!("Cannot back up images of {entity}: {err}"));
                return;
            }
        };
        let seed_root = self.descriptors.paths().img_dir.clone();
        let live_root = self.live_image_dir().to_path_buf();

        for dir in dirs.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let backup_dir = seed_root.join(dir);
            let from_dir = live_root.join(dir);
            if !ensure_dir(&backup_dir) {
                self.errors
                    .push(format!("Cannot create directory {}", backup_dir.display()));
            }

            for entry in WalkDir::new(&from_dir).min_depth(1).max_depth(1).sort_by_file_name() {
                let Ok(entry) = entry else {
                    continue;
                };
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if file_name.starts_with('.') {
                    continue;
                }
                let Some(caps) = pattern.captures(&file_name) else {
                    continue;
                };
                let id = self.ids.generate(entity, &caps["id"], None, None);
                let variant = caps.name("type").map(|m| m.as_str()).unwrap_or_default();
                let target = backup_dir.join(format!("{id}{variant}.{}", &caps["ext"]));
                backup_copy(entity, entry.path(), &target);
            }
        }
    }

    /// Tab icons, one `<class_name>.gif` per tab row of the seed file.
    pub fn backup_tab_images(&mut self) -> LoaderResult<()> {
        let backup_dir = self.descriptors.paths().img_dir.join("t");
        let from_dir = self.live_image_dir().join("t");
        if !ensure_dir(&backup_dir) {
            self.errors
                .push(format!("Cannot create directory {}", backup_dir.display()));
        }

        let doc = self.descriptors.load("tab", None)?;
        for row in &doc.rows {
            let Some(class_name) = row.get("class_name").filter(|c| !c.is_empty()) else {
                continue;
            };
            let file = format!("{class_name}.gif");
            let from = from_dir.join(&file);
            if from.is_file() {
                backup_copy("tab", &from, &backup_dir.join(&file));
            }
        }
        Ok(())
    }

    /// Product pictures from the digit-split tree, with their variants.
    pub fn backup_product_images(&mut self) -> LoaderResult<()> {
        let types = self.image_type_names(Some("products"));
        let backup_dir = self.descriptors.paths().img_dir.join("p");
        let from_root = self.live_image_dir().join("p");
        if !ensure_dir(&backup_dir) {
            self.errors
                .push(format!("Cannot create directory {}", backup_dir.display()));
        }

        let sql = format!(
            "SELECT id_image FROM {} ORDER BY id_image",
            quote_ident(&self.db.table_name("image"))
        );
        let images: Vec<String> = self
            .db
            .query_rows(&sql, &[])?
            .into_iter()
            .filter_map(|row| row.get("id_image").cloned())
            .collect();

        for image in images {
            let Ok(numeric) = image.parse::<i64>() else {
                continue;
            };
            let folder = from_root.join(product_image_folder(numeric));
            let id = self.ids.generate("image", &image, None, None);
            backup_copy(
                "image",
                &folder.join(format!("{image}.jpg")),
                &backup_dir.join(format!("{id}.jpg")),
            );
            for name in &types {
                backup_copy(
                    "image",
                    &folder.join(format!("{image}-{name}.jpg")),
                    &backup_dir.join(format!("{id}-{name}.jpg")),
                );
            }
        }
        Ok(())
    }
}

/// Missing live files are expected, so a failed copy is only logged.
fn backup_copy(entity: &str, from: &Path, to: &Path) {
    if let Err(err) = fs::copy(from, to) {
        tracing::debug!(
            target: "seedloader",
            event = "image_backup_failed",
            entity,
            file = %from.display(),
            error = %err
        );
    }
}
