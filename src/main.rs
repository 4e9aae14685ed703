#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use home::home_dir;

use kubecloud::local;

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn main() -> anyhow::Result<()> {
    #[derive(Clone, Parser)]
    #[clap(version)]
    struct Args {
        /// The tracing filter used for logs
        #[clap(long, env = "KUBECLOUD_LOG", default_value = "kubecloud=info,warn")]
        log_level: kubert::LogFilter,

        /// The logging format
        #[clap(long, default_value = "plain")]
        log_format: kubert::LogFormat,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Clone, Subcommand)]
    enum Commands {
        /// Print the cloud and credential a kubeconfig context would be registered as
        Render {
            /// Path to the kubeconfig; defaults to ~/.kube/config
            #[clap(long, env = "KUBECONFIG")]
            kubeconfig: Option<PathBuf>,

            /// Cloud name
            #[clap(long)]
            name: String,

            /// Context to use instead of the kubeconfig's current-context
            #[clap(long)]
            context: Option<String>,

            #[clap(long, default_value = "")]
            parent_cloud: String,

            #[clap(long, default_value = "")]
            parent_region: String,

            /// Storage class for both operator and workload storage
            #[clap(long, default_value = "")]
            storage_class: String,

            /// Principal the credential is registered for
            #[clap(long, default_value = "admin")]
            owner: String,

            #[clap(long, value_enum, default_value = "yaml")]
            output: OutputFormat,
        },
    }

    let Args {
        log_level,
        log_format,
        command,
    } = Args::parse();

    log_format.try_init(log_level)?;

    match command {
        Commands::Render {
            kubeconfig,
            name,
            context,
            parent_cloud,
            parent_region,
            storage_class,
            owner,
            output,
        } => {
            let path = match kubeconfig {
                Some(path) => path,
                None => home_dir()
                    .ok_or_else(|| anyhow!("unable to retrieve home directory"))?
                    .join(".kube")
                    .join("config"),
            };
            let kubernetes_config = std::fs::read(&path)
                .map_err(|e| anyhow!("reading kubeconfig {}: {e}", path.display()))?;

            let rendered = local::render(&local::RenderInput {
                name,
                kubernetes_config,
                context_name: context,
                parent_cloud_name: parent_cloud,
                parent_cloud_region: parent_region,
                storage_class_name: storage_class,
                owner,
            })?;

            match output {
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&rendered)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rendered)?),
            }
        }
    }

    Ok(())
}
