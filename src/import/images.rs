use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use thiserror::Error;

use super::descriptor::RowData;
use super::hooks::ImageHook;
use crate::config::ImageType;
use crate::error::ErrorSink;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot read image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot write image {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid target size {width}x{height}")]
    Size { width: u32, height: u32 },
}

/// Image type scope used by an entity's variants, if it has any.
pub fn image_scope(entity: &str) -> Option<&'static str> {
    match entity {
        "product" => Some("products"),
        "category" => Some("categories"),
        "manufacturer" => Some("manufacturers"),
        "supplier" => Some("suppliers"),
        "scene" => Some("scenes"),
        "store" => Some("stores"),
        _ => None,
    }
}

/// Digit-split folder of a product image: id 12 lives in `1/2/`.
pub fn product_image_folder(id: i64) -> PathBuf {
    id.to_string()
        .chars()
        .map(|digit| digit.to_string())
        .collect()
}

/// Fit `src` inside `width` x `height` without upscaling, centred on a
/// white canvas of exactly that size. The output format follows the
/// extension of `dst`.
pub fn resize_to_fit(src: &Path, dst: &Path, width: u32, height: u32) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::Size { width, height });
    }
    let source = image::open(src).map_err(|source| ImageError::Decode {
        path: src.display().to_string(),
        source,
    })?;
    let (src_w, src_h) = source.dimensions();
    let fitted = if src_w <= width && src_h <= height {
        source
    } else {
        source.resize(width, height, FilterType::Triangle)
    };

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let x = (width - fitted.width()) / 2;
    let y = (height - fitted.height()) / 2;
    imageops::overlay(&mut canvas, &fitted.to_rgba8(), i64::from(x), i64::from(y));

    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
        .save(dst)
        .map_err(|source| ImageError::Encode {
            path: dst.display().to_string(),
            source,
        })
}

fn is_writable_dir(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}

fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to)?;
    Ok(())
}

#[cfg(unix)]
fn make_public(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
}

#[cfg(not(unix))]
fn make_public(_path: &Path) {}

/// Copies seed images of freshly inserted rows into the live image tree.
pub struct ImageImporter<'a> {
    source: &'a Path,
    target: &'a Path,
    types: &'a [ImageType],
}

impl<'a> ImageImporter<'a> {
    pub fn new(source: &'a Path, target: &'a Path, types: &'a [ImageType]) -> Self {
        Self {
            source,
            target,
            types,
        }
    }

    fn types_for(&self, scope: &str) -> Vec<&'a ImageType> {
        self.types
            .iter()
            .filter(|t| t.scopes.iter().any(|s| s == scope))
            .collect()
    }

    /// Dispatch on the entity's image handler.
    #[allow(clippy::too_many_arguments)]
    pub fn import(
        &self,
        hook: ImageHook,
        entity: &str,
        identifier: &str,
        id: i64,
        dirs: &str,
        data: &RowData,
        errors: &mut ErrorSink,
    ) {
        match hook {
            ImageHook::Default => self.copy_images(entity, identifier, id, dirs, "jpg", errors),
            ImageHook::Scene => self.copy_scene(identifier, id, errors),
            ImageHook::OrderState => self.copy_images("order_state", identifier, id, "os", "gif", errors),
            ImageHook::Tab => self.copy_tab(identifier, data, errors),
            ImageHook::ProductImage => self.copy_product_image(identifier, id, errors),
        }
    }

    /// Copy `<dir>/<identifier>.<ext>` to `<dir>/<id>.<ext>` for each
    /// comma separated dir, then produce every variant of the entity's scope.
    /// A missing base image stops the whole row.
    pub fn copy_images(
        &self,
        entity: &str,
        identifier: &str,
        id: i64,
        dirs: &str,
        extension: &str,
        errors: &mut ErrorSink,
    ) {
        let types = image_scope(entity)
            .map(|scope| self.types_for(scope))
            .unwrap_or_default();

        for dir in dirs.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let from_dir = self.source.join(dir);
            let to_dir = self.target.join(dir);
            let base = from_dir.join(format!("{identifier}.{extension}"));
            let copied = fs::create_dir_all(&to_dir)
                .and_then(|_| copy_file(&base, &to_dir.join(format!("{id}.{extension}"))));
            if let Err(err) = copied {
                image_failed(entity, identifier, &err.to_string());
                errors.push(format!(
                    "Cannot create image \"{identifier}\" for entity \"{entity}\""
                ));
                return;
            }

            for image_type in &types {
                self.copy_variant(
                    entity,
                    identifier,
                    &base,
                    &from_dir.join(format!("{identifier}-{}.{extension}", image_type.name)),
                    &to_dir.join(format!("{id}-{}.{extension}", image_type.name)),
                    image_type,
                    errors,
                );
            }
        }
    }

    /// Reuse a pre-rendered variant when the seed tree ships one, otherwise
    /// resize the base image.
    #[allow(clippy::too_many_arguments)]
    fn copy_variant(
        &self,
        entity: &str,
        identifier: &str,
        base: &Path,
        prerendered: &Path,
        target: &Path,
        image_type: &ImageType,
        errors: &mut ErrorSink,
    ) {
        let label = format!("{identifier}-{}", image_type.name);
        let folder = target.parent().unwrap_or(self.target);
        if !is_writable_dir(folder) {
            errors.push(format!(
                "Cannot create image \"{label}\" (bad permissions on folder \"{}\")",
                folder.display()
            ));
        } else if prerendered.is_file() {
            if let Err(err) = copy_file(prerendered, target) {
                image_failed(entity, &label, &err.to_string());
                errors.push(format!("Cannot create image \"{label}\""));
            }
            make_public(target);
        } else if let Err(err) = resize_to_fit(base, target, image_type.width, image_type.height) {
            image_failed(entity, &label, &err.to_string());
            errors.push(format!("Cannot create image \"{label}\" for entity \"{entity}\""));
        }
    }

    /// Generic copy plus the `scenes/thumbs/<id>-thumb_scene.jpg` artifact.
    pub fn copy_scene(&self, identifier: &str, id: i64, errors: &mut ErrorSink) {
        self.copy_images("scene", identifier, id, "scenes", "jpg", errors);

        let from = self
            .source
            .join("scenes/thumbs")
            .join(format!("{identifier}-thumb_scene.jpg"));
        let to_dir = self.target.join("scenes/thumbs");
        let copied = fs::create_dir_all(&to_dir)
            .and_then(|_| copy_file(&from, &to_dir.join(format!("{id}-thumb_scene.jpg"))));
        if let Err(err) = copied {
            image_failed("scene", identifier, &err.to_string());
            errors.push(format!("Cannot create image \"{identifier}\" for entity \"scene\""));
        }
    }

    /// Admin tab icons are keyed by class name and have no variants.
    pub fn copy_tab(&self, identifier: &str, data: &RowData, errors: &mut ErrorSink) {
        let Some(class_name) = data.get("class_name").filter(|c| !c.is_empty()) else {
            return;
        };
        let file = format!("{class_name}.gif");
        let from = self.source.join("t").join(&file);
        if !from.is_file() {
            return;
        }
        let to_dir = self.target.join("t");
        let copied = fs::create_dir_all(&to_dir).and_then(|_| copy_file(&from, &to_dir.join(&file)));
        if let Err(err) = copied {
            image_failed("tab", identifier, &err.to_string());
            errors.push(format!("Cannot create image \"{identifier}\" for entity \"tab\""));
        }
    }

    /// Product pictures: `p/<identifier>.jpg` lands in the digit-split tree
    /// under `p/`, variants follow the `products` scope.
    pub fn copy_product_image(&self, identifier: &str, id: i64, errors: &mut ErrorSink) {
        let from_dir = self.source.join("p");
        let to_dir = self.target.join("p").join(product_image_folder(id));
        let base = from_dir.join(format!("{identifier}.jpg"));
        let target = to_dir.join(format!("{id}.jpg"));

        let copied = fs::create_dir_all(&to_dir).and_then(|_| copy_file(&base, &target));
        if let Err(err) = copied {
            image_failed("product", identifier, &err.to_string());
            errors.push(format!("Cannot create image \"{identifier}\" for entity \"product\""));
            return;
        }
        make_public(&target);

        for image_type in self.types_for("products") {
            self.copy_variant(
                "product",
                identifier,
                &base,
                &from_dir.join(format!("{identifier}-{}.jpg", image_type.name)),
                &to_dir.join(format!("{id}-{}.jpg", image_type.name)),
                image_type,
                errors,
            );
        }
    }
}

fn image_failed(entity: &str, image: &str, reason: &str) {
    tracing::debug!(target: "seedloader", event = "image_failed", entity, image, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn image_type(name: &str, size: u32, scope: &str) -> ImageType {
        ImageType {
            name: name.into(),
            width: size,
            height: size,
            scopes: vec![scope.into()],
        }
    }

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn folder_splits_digits() {
        assert_eq!(product_image_folder(12), PathBuf::from("1/2"));
        assert_eq!(product_image_folder(7), PathBuf::from("7"));
    }

    #[test]
    fn resize_pads_to_exact_size() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("wide.jpg");
        let dst = dir.path().join("small.png");
        write_jpeg(&src, 40, 20);
        resize_to_fit(&src, &dst, 10, 10).unwrap();
        let out = image::open(&dst).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
        let corner = out.to_rgb8().get_pixel(0, 0).0;
        assert!(corner.iter().all(|c| *c > 230));

        assert!(matches!(
            resize_to_fit(&dir.path().join("missing.jpg"), &dst, 10, 10),
            Err(ImageError::Decode { .. })
        ));
    }

    #[test]
    fn copies_base_reuses_prerendered_and_resizes_the_rest() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_jpeg(&src.path().join("m/apple.jpg"), 30, 30);
        write_jpeg(&src.path().join("m/apple-large.jpg"), 5, 5);
        let types = vec![
            image_type("large", 100, "manufacturers"),
            image_type("small", 8, "manufacturers"),
            image_type("thumb", 8, "products"),
        ];
        let importer = ImageImporter::new(src.path(), dst.path(), &types);
        let mut errors = ErrorSink::new();
        importer.copy_images("manufacturer", "apple", 3, "m", "jpg", &mut errors);

        assert!(errors.is_empty(), "{:?}", errors.messages());
        assert!(dst.path().join("m/3.jpg").is_file());
        assert_eq!(
            image::open(dst.path().join("m/3-large.jpg")).unwrap().dimensions(),
            (5, 5)
        );
        assert_eq!(
            image::open(dst.path().join("m/3-small.jpg")).unwrap().dimensions(),
            (8, 8)
        );
        assert!(!dst.path().join("m/3-thumb.jpg").exists());
    }

    #[test]
    fn missing_base_image_stops_the_row() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let types = vec![image_type("small", 8, "categories")];
        let importer = ImageImporter::new(src.path(), dst.path(), &types);
        let mut errors = ErrorSink::new();
        importer.copy_images("category", "home", 2, "c, c2", "jpg", &mut errors);
        assert_eq!(
            errors.messages(),
            ["Cannot create image \"home\" for entity \"category\""]
        );
        assert!(!dst.path().join("c/2-small.jpg").exists());
    }

    #[test]
    fn failed_variant_does_not_stop_the_others() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::create_dir_all(src.path().join("m")).unwrap();
        // copies fine but cannot be decoded for resizing
        fs::write(src.path().join("m/apple.jpg"), b"not a jpeg").unwrap();
        write_jpeg(&src.path().join("m/apple-medium.jpg"), 6, 6);
        let types = vec![
            image_type("large", 20, "manufacturers"),
            image_type("medium", 10, "manufacturers"),
            image_type("small", 5, "manufacturers"),
        ];
        let importer = ImageImporter::new(src.path(), dst.path(), &types);
        let mut errors = ErrorSink::new();
        importer.copy_images("manufacturer", "apple", 3, "m", "jpg", &mut errors);

        assert_eq!(
            errors.messages(),
            [
                "Cannot create image \"apple-large\" for entity \"manufacturer\"",
                "Cannot create image \"apple-small\" for entity \"manufacturer\"",
            ]
        );
        assert!(dst.path().join("m/3.jpg").is_file());
        assert!(dst.path().join("m/3-medium.jpg").is_file());
        assert!(!dst.path().join("m/3-large.jpg").exists());
    }

    #[test]
    fn product_images_use_digit_split_tree() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_jpeg(&src.path().join("p/ipod-1.jpg"), 20, 20);
        let types = vec![image_type("home", 10, "products")];
        let importer = ImageImporter::new(src.path(), dst.path(), &types);
        let mut errors = ErrorSink::new();
        importer.import(ImageHook::ProductImage, "image", "ipod-1", 12, "", &RowData::new(), &mut errors);
        assert!(errors.is_empty(), "{:?}", errors.messages());
        assert!(dst.path().join("p/1/2/12.jpg").is_file());
        assert!(dst.path().join("p/1/2/12-home.jpg").is_file());
    }

    #[test]
    fn tab_icons_are_copied_by_class_name() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::create_dir_all(src.path().join("t")).unwrap();
        fs::write(src.path().join("t/AdminOrders.gif"), b"GIF89a").unwrap();
        let importer = ImageImporter::new(src.path(), dst.path(), &[]);
        let mut errors = ErrorSink::new();
        let mut data = RowData::new();
        data.insert("class_name".into(), "AdminOrders".into());
        importer.import(ImageHook::Tab, "tab", "orders", 4, "", &data, &mut errors);
        data.insert("class_name".into(), "AdminNothing".into());
        importer.import(ImageHook::Tab, "tab", "nothing", 5, "", &data, &mut errors);
        assert!(errors.is_empty());
        assert!(dst.path().join("t/AdminOrders.gif").is_file());
        assert!(!dst.path().join("t/AdminNothing.gif").exists());
    }

    #[test]
    fn scene_without_thumbnail_records_an_error() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_jpeg(&src.path().join("scenes/beach.jpg"), 10, 10);
        let importer = ImageImporter::new(src.path(), dst.path(), &[]);
        let mut errors = ErrorSink::new();
        importer.copy_scene("beach", 1, &mut errors);
        assert!(dst.path().join("scenes/1.jpg").is_file());
        assert_eq!(
            errors.messages(),
            ["Cannot create image \"beach\" for entity \"scene\""]
        );
    }
}
