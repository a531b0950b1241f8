use clap::{Parser, Subcommand};
use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_DATA_DIR};
use pkg_constants::quota::{DEFAULT_TREE_NAME, DEFAULT_TREE_NAMESPACE};
use pkg_constants::rbac::{DEFAULT_GROUP_NAMESPACE, DEFAULT_USER_NAMESPACE};
use pkg_quota::error::Operation;
use pkg_quota::{
    AccessReconciler, EditAction, GroupService, PrincipalSync, QuotaError, SafetyGate, TreeEdit,
    TreeService, check_tree,
};
use pkg_rbac::{RegistryRbacGateway, RolePolicy, RoleTemplates};
use pkg_state::{Registry, RegistryWorkloadLister, StateStore};
use pkg_types::config::{QuotaConfigFile, load_config_file};
use pkg_types::group::{UserGroup, UserGroupSpec};
use pkg_types::pod::{Pod, PodPhase};
use pkg_types::quota::{QuotaNode, QuotaTree};
use pkg_types::user::User;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quotactl", about = "Manage elastic quota trees, user groups and their access")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Quota tree object name
    #[arg(long)]
    tree_name: Option<String>,

    /// Namespace of the quota tree object
    #[arg(long)]
    tree_namespace: Option<String>,

    /// Namespace holding principals
    #[arg(long)]
    user_namespace: Option<String>,

    /// YAML role template table, merged over the built-in roles
    #[arg(long)]
    role_templates: Option<String>,

    /// Principals reconciled in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the quota tree
    Tree {
        #[command(subcommand)]
        action: TreeAction,
    },
    /// Manage user groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Manage principals
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Record workloads seen by the namespace safety check
    Pod {
        #[command(subcommand)]
        action: PodAction,
    },
}

#[derive(Subcommand)]
enum TreeAction {
    /// Create the tree from a YAML root node
    Create { file: String },
    /// Print the tree
    Get,
    /// Apply one edit; the file holds the whole proposed root node
    Update {
        file: String,
        /// AddNode, UpdateNode, DeleteNode or UpdateResourceType
        #[arg(long)]
        action: String,
        #[arg(long)]
        old_node_name: Option<String>,
        #[arg(long)]
        new_node_name: Option<String>,
        /// Qualified name of the edited node's parent
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete the tree
    Delete,
    /// Check a YAML root node without storing it
    Validate { file: String },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Create a group from a YAML spec
    Create {
        file: String,
        /// Member user id, repeatable
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// Replace a group's spec and members
    Update {
        name: String,
        file: String,
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// Delete a group after detaching its members
    Delete { name: String },
    /// List groups sorted by display name
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show the namespaces each group reaches
    Namespaces { names: Vec<String> },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create or update a principal and reconcile its bindings
    Apply {
        user_id: String,
        #[arg(long)]
        name: Option<String>,
        /// API role tag, repeatable
        #[arg(long = "api-role")]
        api_roles: Vec<String>,
    },
    /// Print a principal
    Get { user_id: String },
}

#[derive(Subcommand)]
enum PodAction {
    /// Record a pod and its phase
    Apply {
        namespace: String,
        name: String,
        #[arg(long, default_value = "Running")]
        phase: String,
    },
    /// Forget a pod
    Delete { namespace: String, name: String },
}

struct Settings {
    data_dir: String,
    tree_name: String,
    tree_namespace: String,
    user_namespace: String,
    role_templates: Option<String>,
    concurrency: usize,
}

impl Settings {
    // CLI args > config file > defaults
    fn resolve(cli: &Cli, file_cfg: QuotaConfigFile) -> Self {
        Self {
            data_dir: cli
                .data_dir
                .clone()
                .or(file_cfg.data_dir)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            tree_name: cli
                .tree_name
                .clone()
                .or(file_cfg.tree_name)
                .unwrap_or_else(|| DEFAULT_TREE_NAME.to_string()),
            tree_namespace: cli
                .tree_namespace
                .clone()
                .or(file_cfg.tree_namespace)
                .unwrap_or_else(|| DEFAULT_TREE_NAMESPACE.to_string()),
            user_namespace: cli
                .user_namespace
                .clone()
                .or(file_cfg.user_namespace)
                .unwrap_or_else(|| DEFAULT_USER_NAMESPACE.to_string()),
            role_templates: cli.role_templates.clone().or(file_cfg.role_templates),
            concurrency: cli.concurrency.or(file_cfg.reconcile_concurrency).unwrap_or(4),
        }
    }
}

struct Services {
    registry: Registry,
    sync: PrincipalSync,
    trees: TreeService,
    groups: GroupService,
}

fn build_services(settings: &Settings, registry: Registry) -> anyhow::Result<Services> {
    let templates = match &settings.role_templates {
        Some(path) => RoleTemplates::load_with_builtin(path)?,
        None => RoleTemplates::builtin(),
    };
    let gateway = Arc::new(RegistryRbacGateway::new(registry.clone()));
    let reconciler = AccessReconciler::new(gateway, Arc::new(templates));
    let sync = PrincipalSync::new(
        registry.clone(),
        reconciler,
        RolePolicy::default(),
        &settings.user_namespace,
    )
    .with_concurrency(settings.concurrency);
    let gate = SafetyGate::new(Arc::new(RegistryWorkloadLister::new(registry.clone())));
    Ok(Services {
        trees: TreeService::new(registry.clone(), gate, sync.clone(), DEFAULT_GROUP_NAMESPACE),
        groups: GroupService::new(
            registry.clone(),
            sync.clone(),
            DEFAULT_GROUP_NAMESPACE,
            &settings.tree_name,
            &settings.tree_namespace,
        ),
        registry,
        sync,
    })
}

fn read_yaml<T: DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
    serde_yaml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))
}

fn print_yaml<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

fn parse_phase(phase: &str) -> anyhow::Result<PodPhase> {
    match phase.to_ascii_lowercase().as_str() {
        "pending" => Ok(PodPhase::Pending),
        "running" => Ok(PodPhase::Running),
        "succeeded" => Ok(PodPhase::Succeeded),
        "failed" => Ok(PodPhase::Failed),
        "unknown" => Ok(PodPhase::Unknown),
        _ => anyhow::bail!("unknown pod phase {}", phase),
    }
}

fn operation_of(command: &Commands) -> Option<Operation> {
    match command {
        Commands::Tree { action } => match action {
            TreeAction::Create { .. } => Some(Operation::CreateTree),
            TreeAction::Update { .. } => Some(Operation::UpdateTree),
            TreeAction::Delete => Some(Operation::DeleteTree),
            _ => None,
        },
        Commands::Group { action } => Some(match action {
            GroupAction::Create { .. } => Operation::CreateGroup,
            GroupAction::Update { .. } => Operation::UpdateGroup,
            GroupAction::Delete { .. } => Operation::DeleteGroup,
            GroupAction::List { .. } => Operation::ListGroups,
            GroupAction::Namespaces { .. } => Operation::GroupNamespaces,
        }),
        _ => None,
    }
}

async fn run(cli: &Cli, settings: &Settings, svc: &Services) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Tree { action } => match action {
            TreeAction::Create { file } => {
                let root: QuotaNode = read_yaml(file)?;
                let tree = svc
                    .trees
                    .create_tree(root, &settings.tree_name, &settings.tree_namespace)
                    .await?;
                println!("quota tree {}/{} created", tree.namespace, tree.name);
            }
            TreeAction::Get => {
                let tree = svc
                    .trees
                    .get_tree(&settings.tree_name, &settings.tree_namespace)
                    .await?;
                print_yaml(&tree)?;
            }
            TreeAction::Update {
                file,
                action,
                old_node_name,
                new_node_name,
                prefix,
            } => {
                let root: QuotaNode = read_yaml(file)?;
                let edit = TreeEdit {
                    action: action.parse::<EditAction>()?,
                    old_node_name: old_node_name.clone(),
                    new_node_name: new_node_name.clone(),
                    prefix: prefix.clone(),
                };
                let proposed = QuotaTree::new(&settings.tree_name, &settings.tree_namespace, root);
                let tree = svc.trees.update_tree(proposed, edit).await?;
                println!(
                    "quota tree {}/{} updated (rv {})",
                    tree.namespace, tree.name, tree.resource_version
                );
            }
            TreeAction::Delete => {
                svc.trees
                    .delete_tree(&settings.tree_name, &settings.tree_namespace)
                    .await?;
                println!("quota tree {}/{} deleted", settings.tree_namespace, settings.tree_name);
            }
            TreeAction::Validate { file } => {
                let root: QuotaNode = read_yaml(file)?;
                check_tree(&root)?;
                println!("quota tree is valid");
            }
        },
        Commands::Group { action } => match action {
            GroupAction::Create { file, members } => {
                let spec: UserGroupSpec = read_yaml(file)?;
                let group = svc.groups.create_group(spec, members).await?;
                println!("user group {} created as {}", group.group_name(), group.name);
            }
            GroupAction::Update { name, file, members } => {
                let spec: UserGroupSpec = read_yaml(file)?;
                let group = svc.groups.update_group(name, spec, members).await?;
                println!("user group {} updated", group.name);
            }
            GroupAction::Delete { name } => {
                svc.groups.delete_group(name).await?;
                println!("user group {} deleted", name);
            }
            GroupAction::List { page, limit, filter } => {
                let result = svc.groups.list_groups(*page, *limit, filter.as_deref()).await?;
                println!("{:<24} {:<24} {}", "NAME", "DISPLAY NAME", "QUOTAS");
                for g in &result.items {
                    println!(
                        "{:<24} {:<24} {}",
                        g.name,
                        g.group_name(),
                        g.spec.quota_names.join(",")
                    );
                }
                if result.items.is_empty() {
                    println!("(no user groups)");
                }
                println!(
                    "page {} of {} group(s), {} per page",
                    result.page, result.total, result.limit
                );
            }
            GroupAction::Namespaces { names } => {
                let filter = if names.is_empty() {
                    None
                } else {
                    Some(names.as_slice())
                };
                let index = svc.groups.group_namespace_index(filter).await?;
                print_yaml(&index)?;
            }
        },
        Commands::User { action } => match action {
            UserAction::Apply {
                user_id,
                name,
                api_roles,
            } => {
                let existing: Option<User> = svc
                    .registry
                    .get(Some(&settings.user_namespace), user_id)
                    .await?;
                let mut user = existing.unwrap_or_else(|| {
                    User::new(&settings.user_namespace, user_id, user_id, Vec::new())
                });
                if let Some(name) = name {
                    user.spec.user_name = name.clone();
                }
                user.spec.api_roles = api_roles.clone();
                let user = svc.registry.create_or_replace(user).await?;

                let groups: Vec<UserGroup> =
                    svc.registry.list(Some(DEFAULT_GROUP_NAMESPACE)).await?;
                let tree: Option<QuotaTree> = svc
                    .registry
                    .get(Some(&settings.tree_namespace), &settings.tree_name)
                    .await?;
                let report = svc
                    .sync
                    .sync(vec![user], &groups, tree.as_ref().map(|t| &t.root))
                    .await?;
                println!(
                    "user {} applied ({} binding(s) created, {} deleted)",
                    user_id, report.created, report.deleted
                );
            }
            UserAction::Get { user_id } => {
                let user = svc.sync.get_user(user_id).await?;
                print_yaml(&user)?;
            }
        },
        Commands::Pod { action } => match action {
            PodAction::Apply {
                namespace,
                name,
                phase,
            } => {
                let pod = Pod {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    phase: parse_phase(phase)?,
                    resource_version: 0,
                    created_at: None,
                };
                let pod = svc.registry.create_or_replace(pod).await?;
                println!("pod {}/{} is {}", pod.namespace, pod.name, pod.phase);
            }
            PodAction::Delete { namespace, name } => {
                svc.registry.delete::<Pod>(Some(namespace), name).await?;
                println!("pod {}/{} deleted", namespace, name);
            }
        },
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: QuotaConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);
    let settings = Settings::resolve(&cli, file_cfg);
    info!("  Data dir:  {}", settings.data_dir);
    info!("  Tree:      {}/{}", settings.tree_namespace, settings.tree_name);
    info!("  Users in:  {}", settings.user_namespace);

    let store = StateStore::new(&settings.data_dir).await?;
    let svc = build_services(&settings, Registry::new(Arc::new(store.clone())))?;

    let result = run(&cli, &settings, &svc).await;
    store.close().await?;

    if let Err(e) = result {
        match e.downcast_ref::<QuotaError>() {
            Some(q) => match operation_of(&cli.command) {
                Some(op) => eprintln!("Error [{}/{}]: {}", q.code(), q.legacy_code(op), q),
                None => eprintln!("Error [{}]: {}", q.code(), q),
            },
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}
