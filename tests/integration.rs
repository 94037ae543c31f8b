use std::fs;
use std::io::Write;

use tempfile::tempdir;
use uuid::Uuid;

use pg_custom::constants::{
    COMMENT, EXTENSION, SCHEMA, TABLE, TABLE_DATA, TYPE,
};
use pg_custom::{Archive, ArchiveError, DataState, EntryDef, SmartConverter, Value};

fn text(value: &str) -> Value {
    Value::from(value)
}

/// Build the archive used by most save/load tests: a schema, an
/// extension with a comment, a type, two tables and five rows.
fn build_example() -> Archive {
    let mut archive = pg_custom::new("example").unwrap();

    let schema = archive
        .add_entry(
            SCHEMA,
            "test",
            EntryDef {
                owner: Some("postgres".to_string()),
                defn: Some("CREATE SCHEMA test;".to_string()),
                drop_stmt: Some("DROP SCHEMA test;".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;

    let extension = archive
        .add_entry(
            EXTENSION,
            "uuid-ossp",
            EntryDef {
                defn: Some("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\";".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;

    archive
        .add_entry(
            COMMENT,
            "EXTENSION uuid-ossp",
            EntryDef {
                defn: Some(
                    "COMMENT ON EXTENSION \"uuid-ossp\" IS 'generate UUIDs';".to_string(),
                ),
                dependencies: vec![extension],
                ..EntryDef::default()
            },
        )
        .unwrap();

    let address_type = archive
        .add_entry(
            TYPE,
            "address_type",
            EntryDef {
                namespace: Some("test".to_string()),
                owner: Some("postgres".to_string()),
                defn: Some(
                    "CREATE TYPE test.address_type AS (street text, city text);".to_string(),
                ),
                dependencies: vec![schema],
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;

    archive
        .add_entry(
            TABLE,
            "addresses",
            EntryDef {
                namespace: Some("test".to_string()),
                owner: Some("postgres".to_string()),
                defn: Some(
                    "CREATE TABLE test.addresses (id uuid, addr test.address_type);"
                        .to_string(),
                ),
                dependencies: vec![schema, address_type, extension],
                ..EntryDef::default()
            },
        )
        .unwrap();

    let example = archive
        .add_entry(
            TABLE,
            "example",
            EntryDef {
                namespace: Some("public".to_string()),
                owner: Some("postgres".to_string()),
                defn: Some(
                    "CREATE TABLE public.example (id int, value text);".to_string(),
                ),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;

    let mut writer = archive
        .table_data_writer(example, &["id", "value"])
        .unwrap();
    for row in 0..4 {
        writer
            .append(&[Value::Int(row), text(&format!("value {row}"))])
            .unwrap();
    }
    writer.append(&[Value::Int(4), Value::Null]).unwrap();
    writer.finish().unwrap();

    archive
}

#[test]
fn save_and_reload_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = build_example();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.dbname, "example");
    assert_eq!(reloaded.version, archive.version);
    assert_eq!(reloaded.compression, 0);
    assert_eq!(
        reloaded.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        archive.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    );

    // Three session entries, six added entries, one implicit TABLE DATA.
    assert_eq!(reloaded.entries.len(), 10);

    // Entries match modulo save-time ordering and offsets.
    for entry in &archive.entries {
        let saved = reloaded.get_entry(entry.dump_id).unwrap();
        assert_eq!(saved.desc, entry.desc);
        assert_eq!(saved.tag, entry.tag);
        assert_eq!(saved.namespace, entry.namespace);
        assert_eq!(saved.owner, entry.owner);
        assert_eq!(saved.defn, entry.defn);
        assert_eq!(saved.section, entry.section);
        assert_eq!(saved.dependencies, entry.dependencies);
    }

    let rows: Vec<_> = reloaded
        .table_data("public", "example")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0], vec![text("0"), text("value 0")]);
    assert_eq!(rows[4], vec![text("4"), Value::Null]);

    let data_entry = reloaded.lookup_entry(TABLE_DATA, "public", "example").unwrap();
    assert!(data_entry.had_dumper);
    assert_eq!(data_entry.data_state, DataState::HasDataOffset);
    assert!(data_entry
        .copy_stmt
        .as_deref()
        .unwrap()
        .starts_with("COPY public.example (id, value) FROM stdin;"));
}

#[test]
fn saved_toc_orders_dependencies_before_dependents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = build_example();
    archive.save(&path).unwrap();
    let reloaded = pg_custom::load(&path).unwrap();

    let position = |id: i32| {
        reloaded
            .entries
            .iter()
            .position(|e| e.dump_id == id)
            .unwrap()
    };
    for entry in &reloaded.entries {
        for dependency in &entry.dependencies {
            assert!(
                position(entry.dump_id) > position(*dependency),
                "{} should come after its dependency {}",
                entry.dump_id,
                dependency
            );
        }
    }
}

#[test]
fn compressed_archive_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = build_example();
    archive.set_compression(9);
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.compression, 9);
    let rows: Vec<_> = reloaded
        .table_data("public", "example")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[1], vec![text("1"), text("value 1")]);
}

#[test]
fn large_table_spans_multiple_chunks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("bulk").unwrap();
    let table = archive
        .add_entry(
            TABLE,
            "events",
            EntryDef {
                namespace: Some("public".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;
    let mut writer = archive
        .table_data_writer(table, &["id", "payload"])
        .unwrap();
    for row in 0..3000i64 {
        writer
            .append(&[Value::Int(row), text(&format!("payload-{row:06}"))])
            .unwrap();
    }
    writer.finish().unwrap();
    archive.set_compression(6);
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    let rows: Vec<_> = reloaded
        .table_data("public", "events")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 3000);
    assert_eq!(rows[2999], vec![text("2999"), text("payload-002999")]);
}

#[test]
fn archive_without_data_saves_in_a_single_pass() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.dump");

    let mut archive = pg_custom::new("empty").unwrap();
    archive.save(&path).unwrap();
    assert!(path.exists());

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.entries.len(), 3);
    assert!(reloaded
        .entries
        .iter()
        .all(|e| e.data_state == DataState::NoData));
}

#[test]
fn empty_table_data_round_trips_as_zero_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    let table = archive
        .add_entry(TABLE, "empty_table", EntryDef::default())
        .unwrap()
        .dump_id;
    let writer = archive.table_data_writer(table, &["id"]).unwrap();
    writer.finish().unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    let rows: Vec<_> = reloaded
        .table_data("", "empty_table")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn second_writer_session_appends_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    let table = archive
        .add_entry(
            TABLE,
            "example",
            EntryDef {
                namespace: Some("public".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;

    let mut writer = archive.table_data_writer(table, &["id"]).unwrap();
    writer.append(&[Value::Int(1)]).unwrap();
    writer.finish().unwrap();

    let mut writer = archive.table_data_writer(table, &["id"]).unwrap();
    writer.append(&[Value::Int(2)]).unwrap();
    writer.finish().unwrap();

    // Only one implicit TABLE DATA entry was created.
    assert_eq!(
        archive
            .entries
            .iter()
            .filter(|e| e.desc == TABLE_DATA)
            .count(),
        1
    );

    archive.save(&path).unwrap();
    let reloaded = pg_custom::load(&path).unwrap();
    let rows: Vec<_> = reloaded
        .table_data("public", "example")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows, vec![vec![text("1")], vec![text("2")]]);
}

#[test]
fn blobs_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    archive.add_blob(16403, b"first blob contents").unwrap();
    archive.add_blob(16404, b"").unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    let blobs: Vec<_> = reloaded
        .blobs()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(
        blobs,
        vec![
            (16403, b"first blob contents".to_vec()),
            (16404, Vec::new()),
        ]
    );
}

#[test]
fn smart_converter_types_survive_the_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let id = Uuid::parse_str("2c23eba6-7d21-4f6c-b454-56c152bf465e").unwrap();
    let mut archive = pg_custom::new("test").unwrap();
    let table = archive
        .add_entry(
            TABLE,
            "example",
            EntryDef {
                namespace: Some("public".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;
    let mut writer = archive
        .table_data_writer(table, &["id", "count", "note"])
        .unwrap();
    writer
        .append(&[Value::Uuid(id), Value::Int(42), Value::Null])
        .unwrap();
    writer.finish().unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load_with(&path, Box::new(SmartConverter)).unwrap();
    let rows: Vec<_> = reloaded
        .table_data("public", "example")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows, vec![vec![Value::Uuid(id), Value::Int(42), Value::Null]]);
}

#[test]
fn format_1_16_keeps_tableam_and_relkind() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    archive.set_server_version("17.0");
    assert_eq!(archive.version, (1, 16, 0));
    archive
        .add_entry(
            TABLE,
            "accounts",
            EntryDef {
                namespace: Some("public".to_string()),
                tableam: Some("heap".to_string()),
                relkind: Some('r'),
                ..EntryDef::default()
            },
        )
        .unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.version, (1, 16, 0));
    let entry = reloaded.lookup_entry(TABLE, "public", "accounts").unwrap();
    assert_eq!(entry.tableam.as_deref(), Some("heap"));
    assert_eq!(entry.relkind, Some('r'));
}

#[test]
fn format_1_12_drops_newer_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    archive.set_server_version("9.6.4");
    assert_eq!(archive.version, (1, 12, 0));
    archive
        .add_entry(
            TABLE,
            "accounts",
            EntryDef {
                namespace: Some("public".to_string()),
                tableam: Some("heap".to_string()),
                ..EntryDef::default()
            },
        )
        .unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.version, (1, 12, 0));
    let entry = reloaded.lookup_entry(TABLE, "public", "accounts").unwrap();
    assert_eq!(entry.tableam, None);
}

#[test]
fn format_1_15_header_carries_compression_algorithm() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = build_example();
    archive.set_server_version("16.1");
    archive.set_compression(5);
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.version, (1, 15, 0));
    assert_eq!(reloaded.compression, 5);
    let rows: Vec<_> = reloaded
        .table_data("public", "example")
        .unwrap()
        .collect::<pg_custom::Result<_>>()
        .unwrap();
    assert_eq!(rows.len(), 5);
}

#[test]
fn deep_dependency_chain_saves_and_reloads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.dump");

    let mut archive = pg_custom::new("chain").unwrap();
    let mut previous = archive
        .add_entry(TABLE, "t0", EntryDef::default())
        .unwrap()
        .dump_id;
    for i in 1..10_000 {
        previous = archive
            .add_entry(
                TABLE,
                &format!("t{i}"),
                EntryDef {
                    dependencies: vec![previous],
                    ..EntryDef::default()
                },
            )
            .unwrap()
            .dump_id;
    }
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.entries.len(), 10_003);
    for entry in &archive.entries {
        let saved = reloaded.get_entry(entry.dump_id).unwrap();
        assert_eq!(saved.tag, entry.tag);
        assert_eq!(saved.dependencies, entry.dependencies);
    }
}

#[test]
fn null_and_empty_statements_stay_distinct() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    archive
        .add_entry(
            TABLE,
            "example",
            EntryDef {
                defn: Some(String::new()),
                drop_stmt: None,
                ..EntryDef::default()
            },
        )
        .unwrap();
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    let entry = reloaded.lookup_entry(TABLE, "", "example").unwrap();
    assert_eq!(entry.defn.as_deref(), Some(""));
    assert_eq!(entry.drop_stmt, None);
}

#[test]
fn encoding_survives_the_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    archive.set_encoding("LATIN1");
    archive.save(&path).unwrap();

    let reloaded = pg_custom::load(&path).unwrap();
    assert_eq!(reloaded.encoding, "LATIN1");
    assert!(reloaded.std_strings);
}

#[test]
fn duplicate_dump_id_is_rejected() {
    let mut archive = pg_custom::new("test").unwrap();
    archive
        .add_entry(
            TABLE,
            "first",
            EntryDef {
                dump_id: Some(7),
                ..EntryDef::default()
            },
        )
        .unwrap();
    let err = archive
        .add_entry(
            TABLE,
            "second",
            EntryDef {
                dump_id: Some(7),
                ..EntryDef::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidId(7)));
}

#[test]
fn cyclic_dependencies_fail_at_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = pg_custom::new("test").unwrap();
    let a = archive
        .add_entry(TABLE, "a", EntryDef::default())
        .unwrap()
        .dump_id;
    let b = archive
        .add_entry(
            TABLE,
            "b",
            EntryDef {
                dependencies: vec![a],
                ..EntryDef::default()
            },
        )
        .unwrap()
        .dump_id;
    for entry in &mut archive.entries {
        if entry.dump_id == a {
            entry.dependencies = vec![b];
        }
    }

    let err = archive.save(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::CyclicDependencies(_)));
    assert!(!path.exists());
}

#[test]
fn bad_magic_is_not_an_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.dump");
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(b"PGBAD\x01\x0e\x00\x04\x08\x01").unwrap();
    drop(file);

    let err = pg_custom::load(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::NotAnArchive(_)));
}

#[test]
fn out_of_range_version_is_unsupported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("old.dump");
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(b"PGDMP\x01\x0b\x00").unwrap();
    drop(file);

    let err = pg_custom::load(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedVersion(1, 11, 0)));
}

#[test]
fn truncated_header_is_a_format_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.dump");
    fs::write(&path, b"PGDMP\x01\x0e").unwrap();

    let err = pg_custom::load(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::Format { .. }));
}

#[test]
fn table_data_lookup_miss_is_entity_not_found() {
    let archive = pg_custom::new("test").unwrap();
    let err = archive.table_data("public", "missing").unwrap_err();
    assert!(matches!(err, ArchiveError::EntityNotFound { .. }));
}

#[test]
fn failed_save_leaves_existing_file_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.dump");

    let mut archive = build_example();
    archive.save(&path).unwrap();
    let original = fs::read(&path).unwrap();

    let mut broken = pg_custom::new("broken").unwrap();
    let a = broken
        .add_entry(TABLE, "a", EntryDef::default())
        .unwrap()
        .dump_id;
    for entry in &mut broken.entries {
        if entry.dump_id == a {
            entry.dependencies = vec![a];
        }
    }
    assert!(broken.save(&path).is_err());

    assert_eq!(fs::read(&path).unwrap(), original);
}
