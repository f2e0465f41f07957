//! Tariff Application CLI

use std::process;

use clap::{Args, Parser, Subcommand};
use jiff::Timestamp;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use tariff::{
    CustomerRole, Discount, PolicyId, PricePolicy, PricingContext,
};
use tariff_app::{
    context::AppContext,
    domain::{
        policies::{PoliciesService, data::NewPolicy},
        pricing::PricingService,
    },
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tariff-app", about = "Tariff CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Policy(PolicyCommand),
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
struct PolicyCommand {
    #[command(subcommand)]
    command: PolicySubcommand,
}

#[derive(Debug, Subcommand)]
enum PolicySubcommand {
    Create(CreatePolicyArgs),
    Deactivate(DeactivatePolicyArgs),
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection string; omit to keep the cache process-local
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[derive(Debug, Args)]
struct CreatePolicyArgs {
    /// Policy display name
    #[arg(long)]
    name: String,

    /// Discount kind: percentage, fixed-amount or fixed-price
    #[arg(long)]
    discount_kind: String,

    /// Percent points for percentage discounts, minor units otherwise
    #[arg(long)]
    discount_value: String,

    /// Scope to a single product
    #[arg(long)]
    product_uuid: Option<Uuid>,

    /// Scope to product categories; repeatable
    #[arg(long)]
    category: Vec<String>,

    /// Scope to a customer role
    #[arg(long)]
    target_role: Option<String>,

    /// Scope to a single user
    #[arg(long)]
    target_user_uuid: Option<Uuid>,

    /// Scope to delivery regions; repeatable
    #[arg(long)]
    region: Vec<String>,

    /// Scope to delivery cities; repeatable
    #[arg(long)]
    city: Vec<String>,

    /// Validity start (RFC 3339)
    #[arg(long)]
    starts_at: Option<Timestamp>,

    /// Validity end (RFC 3339)
    #[arg(long)]
    ends_at: Option<Timestamp>,

    #[arg(long)]
    min_quantity: Option<u32>,

    #[arg(long)]
    max_quantity: Option<u32>,

    /// Minimum order amount in minor units
    #[arg(long)]
    min_order_amount: Option<i64>,

    /// Maximum order amount in minor units
    #[arg(long)]
    max_order_amount: Option<i64>,

    /// Cap on the discount taken per application, in minor units
    #[arg(long)]
    max_discount: Option<i64>,

    /// Floor the discounted price may never fall below, in minor units
    #[arg(long)]
    min_final_price: Option<i64>,

    /// Priority between 1 and 100; higher applies first
    #[arg(long, default_value_t = 50)]
    priority: u8,

    /// Stop the policy walk once this policy applies
    #[arg(long)]
    exclusive: bool,

    #[arg(long)]
    max_total_uses: Option<u32>,

    #[arg(long)]
    max_uses_per_user: Option<u32>,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
struct DeactivatePolicyArgs {
    /// Policy UUID
    #[arg(long)]
    uuid: Uuid,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    /// Product UUID
    #[arg(long)]
    product_uuid: Uuid,

    /// Customer role: retail, business, wholesale, affiliate or distributor
    #[arg(long, default_value = "retail")]
    role: String,

    #[arg(long, default_value_t = 1)]
    quantity: u32,

    /// Requesting user, for user-scoped policies
    #[arg(long)]
    user_uuid: Option<Uuid>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    city: Option<String>,

    /// Pre-discount order total in minor units
    #[arg(long, default_value_t = 0)]
    order_amount: i64,

    #[command(flatten)]
    connection: ConnectionArgs,
}

#[tokio::main]
pub async fn main() {
    let _env = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        eprintln!("{error}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Policy(PolicyCommand {
            command: PolicySubcommand::Create(args),
        }) => create_policy(args).await,
        Commands::Policy(PolicyCommand {
            command: PolicySubcommand::Deactivate(args),
        }) => deactivate_policy(args).await,
        Commands::Resolve(args) => resolve_price(args).await,
    }
}

async fn connect(connection: &ConnectionArgs) -> Result<AppContext, String> {
    AppContext::from_urls(&connection.database_url, connection.redis_url.as_deref())
        .await
        .map_err(|error| format!("failed to initialise application: {error}"))
}

fn parse_discount(kind: &str, value: &str) -> Result<Discount, String> {
    match kind {
        "percentage" => {
            let percent: Decimal = value
                .parse()
                .map_err(|error| format!("invalid percentage `{value}`: {error}"))?;
            Ok(Discount::Percentage(percent))
        }
        "fixed-amount" => {
            let amount: i64 = value
                .parse()
                .map_err(|error| format!("invalid amount `{value}`: {error}"))?;
            Ok(Discount::FixedAmount(amount))
        }
        "fixed-price" => {
            let price: i64 = value
                .parse()
                .map_err(|error| format!("invalid price `{value}`: {error}"))?;
            Ok(Discount::FixedPrice(price))
        }
        other => Err(format!(
            "unknown discount kind `{other}`; expected percentage, fixed-amount or fixed-price"
        )),
    }
}

fn parse_role(role: &str) -> Result<CustomerRole, String> {
    CustomerRole::parse(role).ok_or_else(|| format!("unknown customer role `{role}`"))
}

async fn create_policy(args: CreatePolicyArgs) -> Result<(), String> {
    let discount = parse_discount(&args.discount_kind, &args.discount_value)?;

    let mut policy = PricePolicy::new(PolicyId::new(), discount, args.priority);

    policy.scope.product_id = args.product_uuid;
    policy.scope.categories = SmallVec::from_vec(args.category);
    policy.scope.target_role = args.target_role.as_deref().map(parse_role).transpose()?;
    policy.scope.target_user_id = args.target_user_uuid;
    policy.scope.regions = SmallVec::from_vec(args.region);
    policy.scope.cities = SmallVec::from_vec(args.city);
    policy.window.starts_at = args.starts_at;
    policy.window.ends_at = args.ends_at;
    policy.bounds.min_quantity = args.min_quantity;
    policy.bounds.max_quantity = args.max_quantity;
    policy.bounds.min_order_amount = args.min_order_amount;
    policy.bounds.max_order_amount = args.max_order_amount;
    policy.terms.max_discount = args.max_discount;
    policy.terms.min_final_price = args.min_final_price;
    policy.exclusive = args.exclusive;
    policy.usage.max_total = args.max_total_uses;
    policy.usage.max_per_user = args.max_uses_per_user;

    let ctx = connect(&args.connection).await?;

    let record = ctx
        .policies
        .create_policy(NewPolicy {
            name: args.name,
            policy,
        })
        .await
        .map_err(|error| format!("failed to create policy: {error}"))?;

    println!("policy_uuid: {}", record.policy.id);
    println!("policy_name: {}", record.name);

    Ok(())
}

async fn deactivate_policy(args: DeactivatePolicyArgs) -> Result<(), String> {
    let ctx = connect(&args.connection).await?;

    ctx.policies
        .deactivate_policy(PolicyId::from_uuid(args.uuid))
        .await
        .map_err(|error| format!("failed to deactivate policy: {error}"))?;

    println!("policy_uuid: {}", args.uuid);
    println!("deactivated");

    Ok(())
}

async fn resolve_price(args: ResolveArgs) -> Result<(), String> {
    let role = parse_role(&args.role)?;

    let mut pricing_ctx = PricingContext::new(args.product_uuid, role, args.quantity);
    pricing_ctx.user_id = args.user_uuid;
    pricing_ctx.region = args.region;
    pricing_ctx.city = args.city;
    pricing_ctx.order_amount = args.order_amount;

    let ctx = connect(&args.connection).await?;

    let result = ctx
        .pricing
        .resolve_price(pricing_ctx)
        .await
        .map_err(|error| format!("failed to resolve price: {error}"))?;

    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|error| format!("failed to render result: {error}"))?;

    println!("{rendered}");

    Ok(())
}
