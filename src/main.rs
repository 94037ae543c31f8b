use std::path::PathBuf;
use std::process;

use clap::Parser;

use pg_custom::error::Result;

#[derive(Parser, Debug)]
#[command(
    name = "pg_custom",
    version,
    about = "Inspect PostgreSQL custom-format archives"
)]
struct Args {
    /// Archive created with pg_dump -Fc
    file: PathBuf,

    /// Print each entry's dependency list
    #[arg(short, long)]
    dependencies: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("pg_custom error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let archive = pg_custom::load(&args.file)?;

    println!(
        ";     Archive created at {}",
        archive.timestamp.format("%Y-%m-%d %H:%M:%S %z")
    );
    println!(";     dbname: {}", archive.dbname);
    println!(";     TOC Entries: {}", archive.entries.len());
    println!(";     Compression: {}", archive.compression);
    println!(
        ";     Dump Version: {}.{}.{}",
        archive.version.0, archive.version.1, archive.version.2
    );
    println!(";     Integer: {} bytes", archive.int_size);
    println!(";     Offset: {} bytes", archive.offset_size);
    println!(";     Dumped from database version: {}", archive.server_version);
    println!(";     Dumped by pg_dump version: {}", archive.dump_version);
    println!(";");

    for entry in &archive.entries {
        println!(
            "{}; {} {} {} {} {} {}",
            entry.dump_id,
            entry.table_oid.as_deref().unwrap_or("0"),
            entry.oid.as_deref().unwrap_or("0"),
            entry.desc,
            entry.namespace.as_deref().unwrap_or("-"),
            entry.tag,
            entry.owner.as_deref().unwrap_or("-"),
        );
        if args.dependencies && !entry.dependencies.is_empty() {
            println!(";\tdepends on: {:?}", entry.dependencies);
        }
    }
    Ok(())
}
