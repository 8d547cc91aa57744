use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use memorm::{
    FetchMode, IdCard, PersistConfig, SchemaMode, SessionFactory, Student, StudentGroup,
    generate_ddl, school_registry,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memorm")]
#[command(about = "Student / IdCard one-to-one mapping demos over an in-memory database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct Options {
    /// How the related entity is loaded: eager or lazy
    #[arg(long, default_value = "eager")]
    fetch: FetchMode,
    /// Echo generated SQL
    #[arg(long)]
    show_sql: bool,
    #[arg(long, default_value = "school")]
    database: String,
}

#[derive(Subcommand)]
enum Command {
    /// Persist a student together with a new id card
    CreateStudent(Options),
    /// Persist a student, then load it from a fresh session
    ReadStudent(Options),
    /// Persist an id card first, then a student holding it
    CreateIdCard(Options),
    /// Persist an id card and its holder, then load the card from a fresh session
    ReadIdCard(Options),
    /// Print the generated schema
    Ddl {
        /// Print the mapping metadata as JSON instead
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memorm=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::CreateStudent(options) => create_student(&options).await.map(|_| ()),
        Command::ReadStudent(options) => read_student(&options).await,
        Command::CreateIdCard(options) => create_id_card(&options).await.map(|_| ()),
        Command::ReadIdCard(options) => read_id_card(&options).await,
        Command::Ddl { json } => print_ddl(json),
    }
}

async fn open(options: &Options, mode: SchemaMode) -> Result<SessionFactory> {
    let registry = Arc::new(school_registry(options.fetch).context("invalid mapping")?);
    let config = PersistConfig::new(&options.database)
        .schema_mode(mode)
        .show_sql(options.show_sql);
    SessionFactory::open(config, registry)
        .await
        .with_context(|| format!("failed to open database '{}'", options.database))
}

fn jack() -> Result<Student> {
    let date_of_birth = NaiveDate::from_ymd_opt(2000, 1, 1).context("invalid date of birth")?;
    Ok(Student::new("Jack", date_of_birth, StudentGroup::Rose))
}

/// Returns the ids of the student and of its card.
async fn create_student(options: &Options) -> Result<(i64, i64)> {
    let factory = open(options, SchemaMode::Create).await?;
    let session = factory.open_session();

    session.begin_transaction().await?;
    let mut student = jack()?;
    student.set_id_card(&IdCard::new(true));
    let student_id = session.save(&mut student).await?;
    session.commit().await?;
    session.close().await?;

    let card_id = student.id_card_id().context("id card was not persisted")?;
    println!("Persisted {:?} holding IdCard #{}", student, card_id);
    Ok((student_id, card_id))
}

async fn read_student(options: &Options) -> Result<()> {
    let (student_id, _) = create_student(options).await?;

    let factory = open(options, SchemaMode::None).await?;
    let db = factory.database().clone();
    let session = factory.open_session();

    let student: Student = session.load_entity(student_id).await?;
    println!("Loaded {:?} (fetch {})", student, options.fetch);
    println!("id_card reads before access: {}", db.table_reads("id_card").await?);

    let card = student
        .id_card()
        .await?
        .context("student has no id card")?;
    println!("Id card: {:?}", card);
    println!("id_card reads after access: {}", db.table_reads("id_card").await?);

    session.close().await?;
    Ok(())
}

/// Returns the ids of the student and of its card.
async fn create_id_card(options: &Options) -> Result<(i64, i64)> {
    let factory = open(options, SchemaMode::Create).await?;
    let session = factory.open_session();

    session.begin_transaction().await?;
    let mut card = IdCard::new(true);
    let card_id = session.save(&mut card).await?;
    let mut student = jack()?;
    student.set_id_card(&card);
    let student_id = session.save(&mut student).await?;
    session.commit().await?;
    session.close().await?;

    println!("Persisted {:?} held by {:?}", card, student);
    Ok((student_id, card_id))
}

async fn read_id_card(options: &Options) -> Result<()> {
    let (_, card_id) = create_id_card(options).await?;

    let factory = open(options, SchemaMode::None).await?;
    let db = factory.database().clone();
    let session = factory.open_session();

    let card: IdCard = session.load_entity(card_id).await?;
    println!("Loaded {:?} (fetch {})", card, options.fetch);
    println!("student reads before access: {}", db.table_reads("student").await?);

    let student = card.student().await?.context("id card has no holder")?;
    println!("Held by {:?}", student);
    println!("student reads after access: {}", db.table_reads("student").await?);

    session.close().await?;
    Ok(())
}

fn print_ddl(json: bool) -> Result<()> {
    let registry = school_registry(FetchMode::default())?;
    if json {
        println!("{}", registry.to_json()?);
    } else {
        for statement in generate_ddl(&registry)? {
            println!("{};", statement);
        }
    }
    Ok(())
}
