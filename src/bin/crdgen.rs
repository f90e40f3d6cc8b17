//! # CRD Generator
//!
//! Generates Kubernetes CustomResourceDefinition (CRD) YAML from the Rust type
//! definitions of `Bucket` and `Asset`.
//!
//! ## Usage
//!
//! ```bash
//! # Both CRDs as one multi-document stream
//! cargo run --bin crdgen > config/crd/assetstore.yaml
//!
//! # A single kind
//! cargo run --bin crdgen -- --kind bucket | kubectl apply -f -
//! ```

use asset_store_controller::crd::{Asset, Bucket};
use clap::{Parser, ValueEnum};
use kube::core::CustomResourceExt;

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Bucket,
    Asset,
    All,
}

#[derive(Parser)]
#[command(name = "crdgen", about = "Print the Asset Store CRDs as YAML")]
struct Cli {
    /// Which CRD to print
    #[arg(long, value_enum, default_value = "all")]
    kind: Kind,
}

fn main() {
    let cli = Cli::parse();

    let crds = match cli.kind {
        Kind::Bucket => vec![Bucket::crd()],
        Kind::Asset => vec![Asset::crd()],
        Kind::All => vec![Bucket::crd(), Asset::crd()],
    };

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("#");
    for crd in crds {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
