use std::io::Result;

fn main() -> Result<()> {
    // Use the vendored protoc unless the environment already points at one.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
        std::env::set_var("PROTOC", protoc);
    }

    println!("cargo:rerun-if-changed=proto/wire.proto");
    println!("cargo:rerun-if-changed=proto/wallet.proto");
    println!("cargo:rerun-if-changed=proto/channel.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(
            &["proto/wire.proto", "proto/wallet.proto", "proto/channel.proto"],
            &["proto/"],
        )?;
    Ok(())
}
