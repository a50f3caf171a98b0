mod args;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use nimbus_common::telemetry::{self, OtlpExport};
use nimbus_deploy::report::{EXIT_INVALID_INPUT, EXIT_OK, EXIT_PROVISIONING};
use nimbus_deploy::{builtin_sample, load_sample, teardown_deployment, Orchestrator};

use crate::args::{Args, Command, DeployArgs};
use crate::config::{connect, load_registry, orchestrator_config, user_overrides, validator};
use crate::output::{print_models, print_teardown};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let otlp = args.otlp_endpoint.clone().map(|endpoint| OtlpExport {
        endpoint,
        token: args.otlp_token.clone(),
    });
    let otel_provider = telemetry::init_tracing("nimbus", args.command.name(), otlp.as_ref());

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e:#}");
            EXIT_INVALID_INPUT
        }
    };

    if let Some(provider) = otel_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    match &args.command {
        Command::Models => {
            let registry = load_registry(args.model_config.as_deref())?;
            print_models(&registry);
            Ok(EXIT_OK)
        }
        Command::Teardown {
            deploy_name,
            namespace,
            mount_path,
        } => {
            let cluster = connect(&args.cluster).await?;
            match teardown_deployment(&cluster, deploy_name, namespace, mount_path.as_deref()).await
            {
                Ok(summary) => {
                    print_teardown(namespace, deploy_name, &summary);
                    Ok(EXIT_OK)
                }
                Err(e) => {
                    println!("✗ teardown {namespace}/{deploy_name}: {e}");
                    Ok(EXIT_PROVISIONING)
                }
            }
        }
        Command::Deploy(deploy) => deploy_model(&args, deploy).await,
    }
}

async fn deploy_model(args: &Args, deploy: &DeployArgs) -> Result<i32> {
    let registry = load_registry(args.model_config.as_deref())?;
    let entry = registry.resolve(&deploy.model_name)?;

    let sample = match &deploy.sample_input {
        Some(path) => load_sample(path).await?,
        None => builtin_sample(),
    };

    let cluster = connect(&args.cluster).await?;
    let orchestrator = Orchestrator::new(
        cluster,
        validator(&args.cluster, deploy),
        orchestrator_config(&args.cluster, deploy, sample),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling deployment");
            on_signal.cancel();
        }
    });

    let overrides = user_overrides(deploy);
    let report = orchestrator.plan_and_run(&entry, &overrides, &cancel).await;
    println!("{}", report.summary_line());
    Ok(report.exit_code())
}
