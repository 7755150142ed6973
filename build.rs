fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF, a no-op concern for host builds
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
        println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");
    }

    // Key expression this node publishes under, fixed per build
    println!("cargo:rerun-if-env-changed=NODE_KEYEXPR");
    let keyexpr = std::env::var("NODE_KEYEXPR").unwrap_or_default();
    if keyexpr.is_empty() {
        println!("cargo:rustc-env=NODE_KEYEXPR=null");
        println!("cargo:warning=NODE_KEYEXPR not set, publishing under key expression 'null'");
    } else {
        println!("cargo:rustc-env=NODE_KEYEXPR={}", keyexpr);
    }

    Ok(())
}
