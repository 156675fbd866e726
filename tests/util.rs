#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use seedloader_lib::{Database, Language, LoaderConfig, SourcePaths};

pub const SCHEMA: &str = r#"
CREATE TABLE ps_zone (
    id_zone INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(64) NOT NULL
);
CREATE TABLE ps_country (
    id_country INTEGER PRIMARY KEY AUTOINCREMENT,
    id_zone INTEGER NOT NULL DEFAULT 0,
    iso_code VARCHAR(3) NOT NULL,
    active INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE ps_country_lang (
    id_country INTEGER NOT NULL,
    id_lang INTEGER NOT NULL,
    name VARCHAR(64) NOT NULL,
    PRIMARY KEY (id_country, id_lang)
);
CREATE TABLE ps_product (
    id_product INTEGER PRIMARY KEY AUTOINCREMENT,
    reference VARCHAR(32) NOT NULL
);
CREATE TABLE ps_tag (
    id_tag INTEGER PRIMARY KEY AUTOINCREMENT,
    id_lang INTEGER NOT NULL,
    name VARCHAR(32) NOT NULL
);
CREATE TABLE ps_product_tag (
    id_product INTEGER NOT NULL,
    id_tag INTEGER NOT NULL,
    id_lang INTEGER NOT NULL,
    PRIMARY KEY (id_product, id_tag)
);
"#;

pub const ZONE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_zone>
  <fields id="name">
    <field name="name"/>
  </fields>
  <entities>
    <zone id="europe" name="Europe"/>
    <zone id="asia"><name>Asia</name></zone>
  </entities>
</entity_zone>
"#;

pub const COUNTRY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_country>
  <fields id="iso_code">
    <field name="id_zone" relation="zone"/>
    <field name="iso_code"/>
    <field name="active"/>
  </fields>
  <entities>
    <country id="fr" id_zone="europe" iso_code="FR" active="1"/>
    <country id="jp" id_zone="asia" iso_code="JP" active="1"/>
    <country id="xx" id_zone="3" iso_code="XX" active="0"/>
  </entities>
</entity_country>
"#;

pub const COUNTRY_EN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_country>
  <country id="fr" name="France"/>
  <country id="jp"><name>Japan</name></country>
  <country id="xx" name="Nowhere"/>
</entity_country>
"#;

pub const COUNTRY_FR_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_country>
  <country id="jp" name="Japon"/>
</entity_country>
"#;

pub const PRODUCT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_product>
  <fields id="reference">
    <field name="reference"/>
  </fields>
  <entities>
    <product id="ipod" reference="demo_5"/>
    <product id="iphone" reference="demo_7"/>
  </entities>
</entity_product>
"#;

pub const TAG_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_tag>
  <fields>
    <field name="name"/>
  </fields>
  <entities/>
</entity_tag>
"#;

pub const TAG_EN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<entity_tag>
  <tag id="music" name="music" products="ipod, iphone"/>
  <tag id="phone" name="phone" products="iphone,discontinued"/>
</entity_tag>
"#;

/// A seed tree plus a store with the matching tables, inside one temp dir.
pub struct SeedTree {
    pub dir: tempfile::TempDir,
}

impl SeedTree {
    /// zone, country (with en/fr translations), product and tag.
    pub fn standard() -> Self {
        let tree = Self::empty();
        tree.write("data/zone.xml", ZONE_XML);
        tree.write("data/country.xml", COUNTRY_XML);
        tree.write("langs/en/data/country.xml", COUNTRY_EN_XML);
        tree.write("langs/fr/data/country.xml", COUNTRY_FR_XML);
        tree.write("data/product.xml", PRODUCT_XML);
        tree.write("data/tag.xml", TAG_XML);
        tree.write("langs/en/data/tag.xml", TAG_EN_XML);
        tree.create_store(&tree.db_path());
        tree
    }

    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, text: &str) {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).unwrap()
    }

    pub fn db_path(&self) -> PathBuf {
        self.path("store.sqlite3")
    }

    pub fn create_store(&self, path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
    }

    pub fn config(&self) -> LoaderConfig {
        let paths = SourcePaths::new(self.path("data"), self.path("langs"), self.path("img"));
        LoaderConfig {
            database: self.db_path(),
            languages: vec![Language::new(1, "en"), Language::new(2, "fr")],
            common: paths.clone(),
            fixtures: paths,
            image_dir: self.path("live-img"),
            ..LoaderConfig::default()
        }
    }

    pub fn open(&self) -> Database {
        Database::open(&self.db_path(), "ps_").unwrap()
    }

    /// Config file for the binary, pointing at this tree.
    pub fn write_config(&self) -> PathBuf {
        let path = self.path("seedloader.json");
        fs::write(&path, serde_json::to_string_pretty(&self.config()).unwrap()).unwrap();
        path
    }
}

pub fn column(db: &Database, sql: &str) -> Vec<String> {
    db.query_rows(sql, &[])
        .unwrap()
        .into_iter()
        .map(|row| row.into_iter().next().map(|(_, v)| v).unwrap_or_default())
        .collect()
}
