use std::collections::BTreeMap;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use kpiboard::calc::round_to;
use kpiboard::date_util::{format_day, parse_day, parse_month};
use kpiboard::query::builder::rows_to_csv;
use kpiboard::{
    AdjustedHours, AggregationKind, EntryQuery, GroupBy, Job, JobCost, JobStatus, KpiBoard,
    MonthWindow, Period, Role, SeriesRequest, User, UserFilter, Viewer,
};

#[derive(Parser)]
#[command(name = "kpiboard", about = "KPI tracking and job-cost reporting")]
struct Cli {
    /// Database path (default: ~/.kpiboard/kpiboard.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Act as this user (id, email, or name). Defaults to config current_user.
    #[arg(long = "as", value_name = "USER", global = true)]
    acting_as: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage the KPI catalog
    Kpi {
        #[command(subcommand)]
        action: KpiAction,
    },
    /// View and edit one day's KPI values
    Entry {
        #[command(subcommand)]
        action: EntryAction,
    },
    /// List raw KPI entries with filters
    History {
        /// User id, email, name, or "all"
        #[arg(long, default_value = "all")]
        user: String,
        /// Period: 30d, 2025-06, 2025-Q2, 2025, or START..END
        #[arg(long)]
        period: Option<String>,
        /// Filter by sector
        #[arg(long)]
        sector: Option<String>,
        /// Filter by KPI id or name
        #[arg(long)]
        kpi: Option<String>,
        /// Maximum results
        #[arg(long, default_value = "100")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },
    /// Summary cards, ratios, chart series and recent entries
    Dashboard {
        /// User id, email, name, or "all"
        #[arg(long, default_value = "all")]
        user: String,
        /// Period (default: config default_period, else 30d)
        #[arg(long)]
        period: Option<String>,
        /// Chart grouping: day, week, month
        #[arg(long, default_value = "day")]
        group_by: String,
        /// Number of recent entries (default: config recent_limit, else 5)
        #[arg(long)]
        recent: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Monthly operating cost reports
    Costs {
        #[command(subcommand)]
        action: CostsAction,
    },
    /// Manage jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Record and list operational expenses
    Expense {
        #[command(subcommand)]
        action: ExpenseAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum UserAction {
    /// Add or update a user
    Add {
        id: String,
        name: String,
        #[arg(long)]
        email: Option<String>,
        /// admin or user
        #[arg(long, default_value = "user")]
        role: String,
        /// Count this user's labor in job costs
        #[arg(long)]
        employee: bool,
    },
    /// List users
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum KpiAction {
    /// List KPIs and ratios
    List {
        /// Show the KPIs assigned to this user
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add a KPI
    Add {
        name: String,
        #[arg(long)]
        sector: String,
        /// flow (summed) or stock (averaged)
        #[arg(long, default_value = "flow")]
        aggregation: String,
    },
    /// Assign a KPI to a user
    Assign { user: String, kpi: String },
    /// Add a ratio metric (numerator / denominator × 100)
    Ratio {
        name: String,
        numerator: String,
        denominator: String,
    },
}

#[derive(Subcommand)]
enum EntryAction {
    /// Show stored values for a user and day
    Show {
        #[arg(long)]
        user: Option<String>,
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Set values as KPI=VALUE; an empty VALUE clears the entry
    Set {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Delete every value for a user and day
    Delete {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
enum CostsAction {
    /// Monthly cost rows and per-job allocation
    Overview {
        /// Trailing months (6 or 12 in the usual reports)
        #[arg(long, default_value = "6", conflicts_with = "month")]
        months: u32,
        /// A single month, YYYY-MM
        #[arg(long)]
        month: Option<String>,
        #[command(flatten)]
        hours: HoursArgs,
        #[arg(long)]
        json: bool,
    },
    /// Per-employee labor cost for one month
    Employees {
        /// YYYY-MM (default: this month)
        #[arg(long)]
        month: Option<String>,
        #[command(flatten)]
        hours: HoursArgs,
        #[arg(long)]
        json: bool,
    },
    /// Set an employee's hourly rate
    SetRate { user: String, rate: f64 },
}

#[derive(clap::Args)]
struct HoursArgs {
    /// JSON file with adjusted hours for this session
    #[arg(long)]
    hours_file: Option<String>,
    /// Override hours: USER=HOURS@YYYY-MM (repeatable)
    #[arg(long = "adjust", value_name = "USER=HOURS@YYYY-MM")]
    adjust: Vec<String>,
    /// Write the resulting adjustments back to --hours-file
    #[arg(long, requires = "hours_file")]
    save_hours: bool,
}

#[derive(Subcommand)]
enum JobAction {
    /// Add a job
    Add {
        title: String,
        #[arg(long)]
        client: Option<String>,
        #[arg(long, default_value = "open")]
        status: String,
        /// Start date YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// List jobs
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ExpenseAction {
    /// Record an expense
    Add {
        amount: f64,
        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Related job id
        #[arg(long)]
        job: Option<String>,
    },
    /// List expenses
    List {
        #[arg(long)]
        json: bool,
    },
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_date_arg(date: Option<&str>) -> anyhow::Result<NaiveDate> {
    match date {
        Some(s) => parse_day(s).ok_or_else(|| anyhow::anyhow!("invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(today()),
    }
}

/// The acting identity: --as, else config current_user.
async fn acting_viewer(board: &KpiBoard, acting_as: Option<&str>) -> anyhow::Result<Viewer> {
    let identifier = match acting_as {
        Some(id) => id.to_string(),
        None => board.settings().await?.current_user.ok_or_else(|| {
            anyhow::anyhow!("No acting user. Pass --as USER or run 'kpiboard config set current_user USER'.")
        })?,
    };
    Ok(board.viewer(&identifier).await?)
}

/// Target user for entry commands: the named user, else the viewer.
async fn target_user(board: &KpiBoard, viewer: &Viewer, user: Option<&str>) -> anyhow::Result<String> {
    match user {
        Some(u) => Ok(board.resolve_user(u).await?),
        None => Ok(viewer.user_id.clone()),
    }
}

async fn user_filter(board: &KpiBoard, user: &str) -> anyhow::Result<UserFilter> {
    Ok(match user.parse::<UserFilter>()? {
        UserFilter::All => UserFilter::All,
        UserFilter::User(u) => UserFilter::User(board.resolve_user(&u).await?),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => kpiboard::Database::open_at(path).await?,
        None => kpiboard::Database::open().await?,
    };
    let board = KpiBoard::new(db);
    let acting_as = cli.acting_as.as_deref();

    match cli.command {
        Commands::Status => print_status(&board).await?,
        Commands::Config { action } => handle_config(&board, action).await?,
        Commands::User { action } => handle_user(&board, acting_as, action).await?,
        Commands::Kpi { action } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_kpi(&board, &viewer, action).await?;
        }
        Commands::Entry { action } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_entry(&board, &viewer, action).await?;
        }
        Commands::History {
            user,
            period,
            sector,
            kpi,
            limit,
            json,
            csv,
        } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_history(
                &board,
                &viewer,
                &user,
                period.as_deref(),
                sector.as_deref(),
                kpi.as_deref(),
                limit,
                json,
                csv,
            )
            .await?;
        }
        Commands::Dashboard {
            user,
            period,
            group_by,
            recent,
            json,
        } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_dashboard(&board, &viewer, &user, period.as_deref(), &group_by, recent, json).await?;
        }
        Commands::Costs { action } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_costs(&board, &viewer, action).await?;
        }
        Commands::Job { action } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_job(&board, &viewer, action).await?;
        }
        Commands::Expense { action } => {
            let viewer = acting_viewer(&board, acting_as).await?;
            handle_expense(&board, &viewer, action).await?;
        }
    }

    Ok(())
}

async fn print_status(board: &KpiBoard) -> anyhow::Result<()> {
    let counts = board.status().await?;
    let settings = board.settings().await?;
    println!("KPI Board Status");
    for (table, n) in counts {
        println!("  {:<22} {n}", format!("{table}:"));
    }
    println!(
        "  Acting user:           {}",
        settings.current_user.as_deref().unwrap_or("not set")
    );
    Ok(())
}

async fn handle_config(board: &KpiBoard, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match board.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            board.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = board.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_user(board: &KpiBoard, acting_as: Option<&str>, action: UserAction) -> anyhow::Result<()> {
    match action {
        UserAction::Add {
            id,
            name,
            email,
            role,
            employee,
        } => {
            // Without any users yet there is nobody to act as.
            let viewer = if board.list_users().await?.is_empty() {
                None
            } else {
                Some(acting_viewer(board, acting_as).await?)
            };
            let user = User {
                id,
                name,
                email,
                role: role.parse::<Role>()?,
                job_cost_employee: employee,
            };
            let user = board.add_user(viewer.as_ref(), user).await?;
            println!("Saved user {} ({}, {})", user.name, user.id, user.role);
        }
        UserAction::List { json } => {
            let users = board.list_users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No users. Add one with 'kpiboard user add ID NAME --role admin'.");
            } else {
                for u in &users {
                    let employee = if u.job_cost_employee { " [employee]" } else { "" };
                    println!(
                        "{} ({}) - {}{employee} {}",
                        u.name,
                        u.id,
                        u.role,
                        u.email.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_kpi(board: &KpiBoard, viewer: &Viewer, action: KpiAction) -> anyhow::Result<()> {
    match action {
        KpiAction::List { user, json } => {
            let catalog = match user {
                Some(u) => board.catalog_for(&board.resolve_user(&u).await?).await?,
                None => board.full_catalog().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
                return Ok(());
            }
            for (sector, kpis) in catalog.by_sector() {
                println!("{sector}");
                for k in kpis {
                    println!("  {:<24} {:<22} {}", k.name, k.id, k.aggregation);
                }
            }
            if !catalog.ratios.is_empty() {
                println!("Ratios");
                for r in &catalog.ratios {
                    println!(
                        "  {:<24} {} / {} × 100",
                        r.name, r.numerator_kpi_id, r.denominator_kpi_id
                    );
                }
            }
        }
        KpiAction::Add {
            name,
            sector,
            aggregation,
        } => {
            let aggregation: AggregationKind = aggregation.parse()?;
            let kpi = board.add_kpi(viewer, &name, &sector, aggregation).await?;
            println!("Added KPI {} ({}, {})", kpi.name, kpi.id, kpi.aggregation);
        }
        KpiAction::Assign { user, kpi } => {
            let user_id = board.resolve_user(&user).await?;
            let kpi_id = board.assign_kpi(viewer, &user_id, &kpi).await?;
            println!("Assigned {kpi_id} to {user_id}");
        }
        KpiAction::Ratio {
            name,
            numerator,
            denominator,
        } => {
            let ratio = board.add_ratio(viewer, &name, &numerator, &denominator).await?;
            println!(
                "Added ratio {} = {} / {}",
                ratio.name, ratio.numerator_kpi_id, ratio.denominator_kpi_id
            );
        }
    }
    Ok(())
}

async fn handle_entry(board: &KpiBoard, viewer: &Viewer, action: EntryAction) -> anyhow::Result<()> {
    match action {
        EntryAction::Show { user, date, json } => {
            let user_id = target_user(board, viewer, user.as_deref()).await?;
            let date = parse_date_arg(date.as_deref())?;
            let loaded = board.load_entry(viewer, &user_id, date).await?;
            let catalog = board.catalog_for(&user_id).await?;

            if json {
                let values: BTreeMap<&str, f64> =
                    loaded.iter().map(|(k, e)| (k.as_str(), e.value)).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
                return Ok(());
            }
            println!("{user_id} on {}", format_day(date));
            for (sector, kpis) in catalog.by_sector() {
                println!("{sector}");
                for k in kpis {
                    let value = loaded
                        .get(&k.id)
                        .map(|e| e.value.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("  {:<24} {value}", k.name);
                }
            }
        }
        EntryAction::Set { user, date, values } => {
            let user_id = target_user(board, viewer, user.as_deref()).await?;
            let date = parse_date_arg(date.as_deref())?;
            let catalog = board.catalog_for(&user_id).await?;

            // Unmentioned KPIs keep their stored values.
            let mut form: BTreeMap<String, String> = board
                .load_entry(viewer, &user_id, date)
                .await?
                .into_iter()
                .map(|(kpi_id, e)| (kpi_id, e.value.to_string()))
                .collect();
            for pair in &values {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("expected KPI=VALUE, got '{pair}'"))?;
                let kpi = catalog
                    .resolve(key)
                    .ok_or_else(|| anyhow::anyhow!("unknown KPI '{key}' for {user_id}"))?;
                form.insert(kpi.id.clone(), value.to_string());
            }

            let report = board.save_entry(viewer, &user_id, date, &form).await?;
            println!(
                "Saved {} on {}: {} inserted, {} updated, {} cleared",
                user_id,
                format_day(date),
                report.inserted,
                report.updated,
                report.deleted
            );
            if !report.skipped.is_empty() {
                eprintln!("Skipped invalid values for: {}", report.skipped.join(", "));
            }
        }
        EntryAction::Delete { user, date } => {
            let user_id = target_user(board, viewer, user.as_deref()).await?;
            let date = parse_date_arg(date.as_deref())?;
            let removed = board.delete_entry(viewer, &user_id, date).await?;
            println!("Deleted {removed} entries for {user_id} on {}", format_day(date));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_history(
    board: &KpiBoard,
    viewer: &Viewer,
    user: &str,
    period: Option<&str>,
    sector: Option<&str>,
    kpi: Option<&str>,
    limit: u32,
    json: bool,
    csv: bool,
) -> anyhow::Result<()> {
    let filter = user_filter(board, user).await?;
    let mut query = EntryQuery::new().limit(limit).descending();
    if let Some(p) = period {
        query = query.period(&Period::parse(p)?);
    }
    if let Some(s) = sector {
        query = query.sector(s);
    }
    if let Some(k) = kpi {
        let catalog = board.full_catalog().await?;
        let id = catalog.resolve(k).map(|d| d.id.clone()).unwrap_or_else(|| k.to_string());
        query = query.kpi(&id);
    }

    let rows = board.entry_history(viewer, &filter, query).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if csv {
        print!("{}", rows_to_csv(&rows));
    } else if rows.is_empty() {
        println!("No entries found.");
    } else {
        for row in &rows {
            println!(
                "{} {:<16} {:<24} {:>10}",
                row.date,
                row.user_name.as_deref().unwrap_or(&row.user_id),
                row.kpi_name.as_deref().unwrap_or(&row.kpi_id),
                row.value
            );
        }
        println!("\n{} entries", rows.len());
    }
    Ok(())
}

async fn handle_dashboard(
    board: &KpiBoard,
    viewer: &Viewer,
    user: &str,
    period: Option<&str>,
    group_by: &str,
    recent: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let settings = board.settings().await?;
    let period = Period::parse(period.unwrap_or(&settings.default_period))?;
    let request = SeriesRequest {
        period,
        user: user_filter(board, user).await?,
        group_by: group_by.parse::<GroupBy>()?,
        recent_limit: recent.unwrap_or(settings.recent_limit),
    };
    let series = board.kpi_series(viewer, &request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&series)?);
        return Ok(());
    }

    println!(
        "{} ({}), {} vs {}",
        request.period.label(),
        series.user,
        series.period,
        series.previous_period
    );
    println!();
    let mut sector = "";
    for card in &series.cards {
        if card.sector != sector {
            sector = card.sector.as_str();
            println!("{sector}");
        }
        println!(
            "  {:<24} {:>10} {:>+5}%",
            card.name,
            round_to(card.value, 1),
            card.trend
        );
    }
    if !series.ratios.is_empty() {
        println!("Ratios");
        for r in &series.ratios {
            println!("  {:<24} {:>9}% {:>+5}%", r.name, round_to(r.value, 1), r.trend);
        }
    }

    if !series.chart.is_empty() {
        println!("\nBy {}", series.group_by);
        for point in &series.chart {
            let values: Vec<String> = series
                .cards
                .iter()
                .map(|c| format!("{}={}", c.name, point.values.get(&c.name)))
                .collect();
            println!("  {}  {}", point.bucket, values.join("  "));
        }
    }

    if !series.recent_entries.is_empty() {
        println!("\nRecent entries");
        for entry in &series.recent_entries {
            let filled: Vec<String> = entry
                .values
                .iter()
                .filter(|(_, v)| *v != 0.0)
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            println!(
                "  {} {:<16} {}",
                format_day(entry.date),
                entry.user_name.as_deref().unwrap_or(&entry.user_id),
                filled.join(", ")
            );
        }
    }
    if series.skipped_rows > 0 {
        eprintln!("{} malformed rows were skipped", series.skipped_rows);
    }
    Ok(())
}

async fn load_hours(board: &KpiBoard, args: &HoursArgs) -> anyhow::Result<AdjustedHours> {
    let configured = board.settings().await?.default_hours;
    let mut hours = match &args.hours_file {
        Some(path) if std::path::Path::new(path).exists() => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            AdjustedHours::from_json_with_default(&json, configured)?
        }
        _ => AdjustedHours::with_default_hours(configured),
    };
    for adjustment in &args.adjust {
        hours.apply_adjustment(adjustment)?;
    }
    if args.save_hours {
        if let Some(path) = &args.hours_file {
            std::fs::write(path, hours.to_json()?).with_context(|| format!("writing {path}"))?;
            log::info!("Saved adjusted hours to {path}");
        }
    }
    Ok(hours)
}

async fn handle_costs(board: &KpiBoard, viewer: &Viewer, action: CostsAction) -> anyhow::Result<()> {
    match action {
        CostsAction::Overview {
            months,
            month,
            hours,
            json,
        } => {
            let window = match month {
                Some(m) => MonthWindow::parse(&m)?,
                None => MonthWindow::trailing(months),
            };
            let hours = load_hours(board, &hours).await?;
            let series = board.cost_series(viewer, &window, &hours).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&series)?);
                return Ok(());
            }
            if let Some(latest) = series.latest() {
                println!("{} ({})", latest.month, series.window);
                println!("  Total cost:     {:>12.2}", latest.total_cost);
                println!("  Active jobs:    {:>12}", latest.open_jobs_count);
                println!("  Cost per job:   {:>12.2}", latest.cost_per_job);
            }
            println!();
            println!(
                "{:<10} {:>12} {:>12} {:>12} {:>6} {:>12}",
                "Month", "Employees", "Job costs", "Total", "Jobs", "Per job"
            );
            for m in &series.months {
                println!(
                    "{:<10} {:>12.2} {:>12.2} {:>12.2} {:>6} {:>12.2}",
                    m.month,
                    m.total_employee_cost,
                    m.total_job_costs,
                    m.total_cost,
                    m.open_jobs_count,
                    m.cost_per_job
                );
            }
            if !series.allocations.is_empty() {
                println!("\nJob allocation");
                for a in &series.allocations {
                    println!(
                        "  {} {:<30} {:<8} {:>12.2}",
                        format_day(a.start_date),
                        a.job_title,
                        a.status,
                        a.total_allocated_cost
                    );
                }
            }
        }
        CostsAction::Employees { month, hours, json } => {
            let month = match month {
                Some(m) => parse_month(&m).ok_or_else(|| anyhow::anyhow!("invalid month '{m}'"))?,
                None => today(),
            };
            let hours = load_hours(board, &hours).await?;
            let lines = board.employee_cost_lines(viewer, month, &hours).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
                return Ok(());
            }
            if lines.is_empty() {
                println!("No cost-bearing employees. Mark users with 'kpiboard user add ... --employee'.");
                return Ok(());
            }
            let mut total = 0.0;
            for l in &lines {
                let marker = if l.adjusted { "*" } else { "" };
                println!(
                    "  {:<20} {:>8.2}/h × {:>7.1}h{marker:<1} = {:>10.2}",
                    l.name, l.hourly_rate, l.hours, l.cost
                );
                total += l.cost;
            }
            println!("  {:<20} {:>33.2}", "Total", total);
        }
        CostsAction::SetRate { user, rate } => {
            let user_id = board.resolve_user(&user).await?;
            board.update_employee_rate(viewer, &user_id, rate).await?;
            println!("Hourly rate for {user_id} set to {rate:.2}");
        }
    }
    Ok(())
}

async fn handle_job(board: &KpiBoard, viewer: &Viewer, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Add {
            title,
            client,
            status,
            date,
            end,
        } => {
            let start = parse_date_arg(date.as_deref())?;
            let end = match end {
                Some(e) => Some(format_day(parse_date_arg(Some(e.as_str()))?)),
                None => None,
            };
            let job = board
                .add_job(
                    viewer,
                    Job {
                        id: String::new(),
                        job_title: title,
                        client_id: client,
                        status: status.parse::<JobStatus>()?,
                        job_date: Some(format_day(start)),
                        start_date: None,
                        end_date: end,
                    },
                )
                .await?;
            println!("Added job {} ({})", job.job_title, job.id);
        }
        JobAction::List { json } => {
            let jobs = board.list_jobs(viewer).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs.");
            } else {
                for j in &jobs {
                    println!(
                        "{} {:<30} {:<8} {}",
                        j.start_raw().unwrap_or("----------"),
                        j.job_title,
                        j.status,
                        j.id
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_expense(board: &KpiBoard, viewer: &Viewer, action: ExpenseAction) -> anyhow::Result<()> {
    match action {
        ExpenseAction::Add {
            amount,
            date,
            description,
            job,
        } => {
            let date = parse_date_arg(date.as_deref())?;
            let cost = board
                .add_expense(
                    viewer,
                    JobCost {
                        id: String::new(),
                        job_id: job,
                        description,
                        amount,
                        cost_date: format_day(date),
                    },
                )
                .await?;
            println!("Recorded {:.2} on {} ({})", cost.amount, cost.cost_date, cost.id);
        }
        ExpenseAction::List { json } => {
            let costs = board.list_expenses(viewer).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&costs)?);
            } else if costs.is_empty() {
                println!("No expenses.");
            } else {
                for c in &costs {
                    println!("{} {:>12.2} {}", c.cost_date, c.amount, c.description);
                }
            }
        }
    }
    Ok(())
}
