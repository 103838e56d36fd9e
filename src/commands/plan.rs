//! `wksctl plan` subcommands.

use crate::Context;
use crate::cli::{
    ApplyArgs, OutputFormat, PlanCommand, TargetArgs, UndoArgs, UpgradeArgs, ViewArgs,
};
use crate::config::Config;
use crate::progress;
use crate::recipe::{self, NodeRecipe};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use log::{debug, info};
use plan::runner::{LocalRunner, SshRunner, SudoRunner};
use plan::{ApplyContext, Diff, Plan, Runner, State};

pub fn run(ctx: &Context, cmd: PlanCommand) -> Result<()> {
    match cmd {
        PlanCommand::View(args) => view(ctx, &args),
        PlanCommand::Apply(args) => apply(ctx, &args),
        PlanCommand::Undo(args) => undo(ctx, &args),
        PlanCommand::Upgrade(args) => upgrade(ctx, &args),
    }
}

/// Where commands for `config` run
fn connect(config: &Config, local: bool) -> Result<Box<dyn Runner>> {
    if local {
        debug!("running commands locally");
        return Ok(Box::new(LocalRunner));
    }
    let ssh = config.ssh()?;
    let mut runner = SshRunner::new(&ssh.user, &ssh.host).with_port(ssh.port);
    if let Some(key) = ssh.key_path() {
        runner = runner.with_key(key);
    }
    info!("connecting to {}@{}:{}", ssh.user, ssh.host, ssh.port);
    Ok(if ssh.sudo {
        Box::new(SudoRunner::new(runner))
    } else {
        Box::new(runner)
    })
}

/// Load the configuration, connect and build the node plan
fn prepare(
    apply_ctx: &ApplyContext,
    target: &TargetArgs,
) -> Result<(Plan, Box<dyn Runner>)> {
    let config = Config::load_or_user(&target.config)?;
    let runner = connect(&config, target.local)?;
    let packages = recipe::resolve_packages(config.cluster.pkg_type, apply_ctx, runner.as_ref())?;
    debug!("installing with {packages:?} packages");

    let node = NodeRecipe {
        cluster: &config.cluster,
        packages,
        files: config.file_resources()?,
        manifests: config.manifest_resources(),
        kubeadm_config: config.kubeadm_config()?,
    }
    .node_plan()
    .context("Could not build the node plan")?;
    Ok((node, runner))
}

fn apply_context(ctx: &Context) -> ApplyContext {
    ApplyContext::with_cancel(ctx.cancel.clone())
}

fn view(ctx: &Context, args: &ViewArgs) -> Result<()> {
    let (node, _) = prepare(&apply_context(ctx), &args.target)?;
    match args.output {
        OutputFormat::Dot => print!("{}", node.to_dot()),
        OutputFormat::Json => println!("{}", node.to_json()?),
    }
    Ok(())
}

fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let apply_ctx = apply_context(ctx);
    let (node, runner) = prepare(&apply_ctx, &args.target)?;
    converge(ctx, &apply_ctx, &node, runner.as_ref(), args.report)
}

fn upgrade(ctx: &Context, args: &UpgradeArgs) -> Result<()> {
    let apply_ctx = apply_context(ctx);
    let config = Config::load_or_user(&args.target.config)?;
    let runner = connect(&config, args.target.local)?;
    let packages = recipe::resolve_packages(config.cluster.pkg_type, &apply_ctx, runner.as_ref())?;
    let version = &config.cluster.kubernetes_version;
    info!("upgrading {:?} to Kubernetes {version}", args.role);

    let upgrade = recipe::upgrade_plan(packages, version, args.role)
        .context("Could not build the upgrade plan")?;
    converge(ctx, &apply_ctx, &upgrade, runner.as_ref(), args.report)
}

/// Converge `plan` from scratch and report the outcome
fn converge(
    ctx: &Context,
    apply_ctx: &ApplyContext,
    plan: &Plan,
    runner: &dyn Runner,
    report: bool,
) -> Result<()> {
    let pb = progress::spinner(&format!("Converging {} resources", plan.len()), ctx.quiet);
    let result = plan.converge(apply_ctx, runner, &Diff::empty());

    if !result.tree.is_valid() {
        progress::finish_error(&pb, "Plan did not converge");
        eprintln!("{}", result.tree.to_json_pretty());
        ui::report(&result.tree);
        bail!("plan {} did not converge", plan.id());
    }

    progress::finish_success(&pb, "Plan converged");
    if report {
        println!("{}", result.tree.to_json_pretty());
    }
    if !ctx.quiet {
        ui::report(&result.tree);
    }
    Ok(())
}

fn undo(ctx: &Context, args: &UndoArgs) -> Result<()> {
    let apply_ctx = apply_context(ctx);
    let (node, runner) = prepare(&apply_ctx, &args.target)?;

    if !ctx.quiet {
        ui::header("Undo");
        ui::kv("plan", node.id());
        ui::kv("resources", &node.len().to_string());
    }
    if !args.yes && !confirm_undo()? {
        ui::warn("Aborted");
        return Ok(());
    }

    let pb = progress::spinner("Undoing node plan", ctx.quiet);
    match node.undo_all(&apply_ctx, runner.as_ref(), &State::empty()) {
        Ok(()) => {
            progress::finish_success(&pb, "Plan undone");
            Ok(())
        }
        Err(plan::Error::Undo { plan_id, failures }) => {
            progress::finish_error(&pb, "Undo incomplete");
            for failure in &failures {
                ui::error(&format!("{}: {}", failure.resource_id, failure.error));
            }
            bail!("undo of plan {plan_id} failed for {} resource(s)", failures.len())
        }
        Err(e) => {
            progress::finish_error(&pb, "Undo failed");
            Err(e.into())
        }
    }
}

/// Confirm with user
fn confirm_undo() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Remove everything the node plan installed?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
