/// Build script for the firmware image.
///
/// Places the linker script where the linker can find it and passes it to
/// the final link of the firmware binary.
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());

    fs::copy(manifest_dir.join("link.x"), out_dir.join("link.x"))
        .expect("Failed to copy linker script");

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rerun-if-changed=link.x");
    println!("cargo:rerun-if-changed=src/entry.S");
}
