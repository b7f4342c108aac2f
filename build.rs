use std::env;
use std::fs;
use std::path::PathBuf;

/// Place `config.json` in the profile directory (`target/<profile>`), where
/// the binary looks for it first.
fn main() {
    println!("cargo:rerun-if-changed=config.json");
    println!("cargo:rerun-if-env-changed=CARGO_TARGET_DIR");

    let Some(manifest_dir) = env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from) else {
        println!("cargo:warning=CARGO_MANIFEST_DIR unset; config.json not staged");
        return;
    };

    let src = manifest_dir.join("config.json");
    if !src.is_file() {
        println!("cargo:warning=no config.json at {}; the binary will need one beside it", src.display());
        return;
    }

    let target_dir = env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .map(|dir| if dir.is_relative() { manifest_dir.join(dir) } else { dir })
        .unwrap_or_else(|| manifest_dir.join("target"));
    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let profile_dir = target_dir.join(profile);

    if let Err(e) = fs::create_dir_all(&profile_dir)
        .and_then(|_| fs::copy(&src, profile_dir.join("config.json")))
    {
        println!("cargo:warning=config.json not staged in {}: {e}", profile_dir.display());
    }
}
