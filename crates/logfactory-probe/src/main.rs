// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::{anyhow, Context};
use std::env;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logfactory::{
    FixedScopeProvider, IsolationScope, ResolutionPlan, Resolver, ResolverConfig, SearchPath,
};

const PROBE_PATH_ENV: &str = "LOGFACTORY_PROBE_PATH";
const PROBE_FORMAT_ENV: &str = "LOGFACTORY_PROBE_FORMAT";
const LOG_LEVEL_ENV: &str = "LOGFACTORY_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<ExitCode> {
    let log_level = env::var(LOG_LEVEL_ENV)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&log_level).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let format = match env::var(PROBE_FORMAT_ENV).as_deref() {
        Ok("json") => OutputFormat::Json,
        Ok("text") | Err(_) => OutputFormat::Text,
        Ok(other) => return Err(anyhow!("unsupported {PROBE_FORMAT_ENV} value '{other}'")),
    };

    let scope = env::var_os(PROBE_PATH_ENV).map(|paths| {
        IsolationScope::builder("probe")
            .resources(SearchPath::new(env::split_paths(&paths)))
            .build()
    });
    if scope.is_none() {
        info!("{PROBE_PATH_ENV} not set, probing the default scope");
    }

    let resolver = Resolver::builder()
        .config(ResolverConfig::from_env())
        .scope_provider(FixedScopeProvider(scope))
        .build();

    let plan = resolver.explain();
    print_plan(&plan, format)?;

    match resolver.get_factory() {
        Ok(factory) => {
            info!("Resolved factory {}", factory.type_name());
            resolver.release_all();
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let e = anyhow::Error::new(e);
            error!("Unable to resolve a factory");
            for cause in e.chain() {
                eprintln!("caused by: {cause}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_plan(plan: &ResolutionPlan, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(plan)?);
        }
        OutputFormat::Text => {
            println!("scope:          {}", plan.scope.as_deref().unwrap_or("default"));
            if let Some(tree) = &plan.scope_tree {
                println!("scope tree:     {tree}");
            }
            for source in &plan.sources {
                println!(
                    "source:         {} (priority {}, factory {})",
                    source.origin,
                    source.priority,
                    source.type_name.as_deref().unwrap_or("-")
                );
            }
            if let Some(winner) = &plan.winning_source {
                println!("winning source: {winner}");
            }
            println!("scope lookup:   {}", plan.use_scope_namespace);
            println!("factory:        {} (from {})", plan.type_name, plan.type_source);
            for (name, value) in plan.attributes.iter() {
                println!("attribute:      {name}={value}");
            }
        }
    }
    Ok(())
}
