fn main() {
    println!("cargo:rerun-if-env-changed=CEPTON_SDK_LIB_DIR");

    // Only the native binding needs libcepton_sdk on the link line.
    if std::env::var_os("CARGO_FEATURE_CEPTON_SDK").is_none() {
        return;
    }

    if let Ok(dir) = std::env::var("CEPTON_SDK_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
}
