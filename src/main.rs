use anyhow::{Context, Result};
use askql_gateway::db::{init_pool, PgAuditLog};
use askql_gateway::execution::PgQueryExecutor;
use askql_gateway::llm::LlmClient;
use askql_gateway::observability::init_tracing;
use askql_gateway::schema::PgSchemaSource;
use askql_gateway::{
    AuditSink, DatasetScope, GatewayConfig, InMemoryAuditLog, QueryGateway, RefinementLoop,
    SchemaCatalog, SqlValidator, UserContext,
};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "askql")]
#[command(about = "Natural-language questions answered with validated, read-only SQL")]
struct Cli {
    /// Keep audit records in memory instead of writing query_audit_log
    #[arg(long, global = true)]
    in_memory_audit: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question against a dataset scope and print the result as JSON
    Ask {
        question: String,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 0)]
        user_id: i64,
        #[arg(long, default_value = "analyst")]
        role: String,
    },
    /// Validate a SQL statement against a scope without executing it
    Validate {
        sql: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Print the schema of a scope as the generator sees it
    Schema {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Create the audit table
    Migrate,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long)]
    dataset_id: i64,
    #[arg(long)]
    dataset_name: Option<String>,
    /// Schema the dataset lives in
    #[arg(long)]
    schema: String,
    /// Comma-separated list of permitted tables
    #[arg(long, value_delimiter = ',', required = true)]
    tables: Vec<String>,
}

impl ScopeArgs {
    fn to_scope(&self) -> DatasetScope {
        DatasetScope::new(
            self.dataset_id,
            self.dataset_name.clone().unwrap_or_else(|| self.schema.clone()),
            self.schema.clone(),
            self.tables.iter().map(|t| t.trim().to_string()).collect(),
        )
    }
}

fn build_gateway(config: &GatewayConfig, pool: PgPool, in_memory_audit: bool) -> Result<QueryGateway> {
    let catalog = Arc::new(SchemaCatalog::new(
        Arc::new(PgSchemaSource::new(pool.clone())),
        config.schema_cache_ttl,
    ));
    let validator = SqlValidator::new(config.validator_config());
    let generator = Arc::new(LlmClient::new(config.llm_config())?);
    let runner = Arc::new(PgQueryExecutor::new(pool.clone(), config.max_query_rows as usize));
    let refinement = RefinementLoop::new(generator, runner, validator.clone(), config.refinement_config());
    let audit: Arc<dyn AuditSink> = if in_memory_audit {
        Arc::new(InMemoryAuditLog::new())
    } else {
        Arc::new(PgAuditLog::new(pool))
    };
    Ok(QueryGateway::new(catalog, refinement, validator, audit))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = GatewayConfig::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log_level)?;
    info!("askql starting (model {})", config.openai_model);

    let pool = init_pool(&config.database_url, &config.pool_settings())
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Command::Ask {
            question,
            scope,
            user_id,
            role,
        } => {
            let gateway = build_gateway(&config, pool, cli.in_memory_audit)?;
            let result = gateway
                .ask(&question, &scope.to_scope(), &UserContext::new(user_id, role))
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Validate { sql, scope } => {
            let gateway = build_gateway(&config, pool, cli.in_memory_audit)?;
            let verdict = gateway.preview(&sql, &scope.to_scope()).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Schema { scope } => {
            let gateway = build_gateway(&config, pool, cli.in_memory_audit)?;
            let snapshot = gateway.catalog().snapshot(&scope.to_scope()).await?;
            println!("{}", snapshot.render_for_prompt());
        }
        Command::Migrate => {
            PgAuditLog::new(pool).migrate().await?;
            info!("Audit table ready");
        }
    }

    Ok(())
}
