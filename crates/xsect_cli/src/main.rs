//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `xsect_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;

fn main() -> ExitCode {
    println!("xsect_core version={}", xsect_core::core_version());

    // In-memory bootstrap exercises the full migration chain without
    // touching local files.
    match xsect_core::db::open_db_in_memory() {
        Ok(_conn) => {
            println!(
                "xsect_core schema_version={}",
                xsect_core::db::migrations::latest_version()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("xsect_core bootstrap failed: {err}");
            ExitCode::FAILURE
        }
    }
}
