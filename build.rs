fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc unless one is provided explicitly.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile the yavirtd service definition. The server half backs the
    // in-process fake daemon used by the integration tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/yavirtd.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/yavirtd.proto");
    Ok(())
}
