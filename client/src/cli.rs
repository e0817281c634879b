use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use common::viewer::{self, write_progress_csv};
use common::{
    ApiError, CreateJobRequest, ExportStore, Job, JobSummary, QualityLookup, QualityRequest,
    QualityRow, SaveResponse, StageTimingRequest, TimelineRow, Viewer, WellProgress, WellSpec,
};
use reqwest::{Client, Response, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

/// - En Docker: KPI_SERVER_URL=http://server:8080
/// - Local: default http://localhost:8080
fn server_base_url() -> String {
    env::var("KPI_SERVER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para cargar y ver jobs de completación (KPI)")]
struct Cli {
    /// Leer de un export JSON ({"jobs": {...}}) en vez del server (sólo lectura)
    #[arg(long, global = true, value_name = "ARCHIVO")]
    export: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lista los jobs
    Jobs,
    /// Muestra un job completo
    Show {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Crea un job nuevo (vacío)
    CreateJob {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long, default_value = "")]
        operator: String,
        #[arg(long, default_value = "")]
        pad: String,
        /// Pozo y cantidad de stages, ej: --well "Smith 1H=40" (repetible)
        #[arg(long = "well", value_name = "NOMBRE=STAGES", required = true, value_parser = parse_well)]
        wells: Vec<WellSpec>,
        /// Reemplazar el job si ya existe
        #[arg(long)]
        overwrite: bool,
    },
    /// Agrega (o reemplaza) los tiempos de un stage
    AddStage {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long)]
        well: String,
        #[arg(long)]
        stage: u32,
        /// Fecha (AAAA-MM-DD), por defecto hoy
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Hora de inicio (HH:MM)
        #[arg(long)]
        start: String,
        /// Hora de fin (HH:MM)
        #[arg(long)]
        end: String,
    },
    /// Agrega (o reemplaza) la info de calidad de un stage
    AddQuality {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long)]
        well: String,
        #[arg(long)]
        stage: u32,
        #[arg(long, default_value = "")]
        pre_sand: String,
        #[arg(long, default_value = "")]
        post_sand: String,
        #[arg(long, default_value = "")]
        spp: String,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Progreso por pozo
    Progress {
        #[arg(value_name = "JOB_ID")]
        id: String,
        /// Imprimir la tabla como CSV
        #[arg(long)]
        csv: bool,
    },
    /// Timeline de stages
    Timeline {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Datos de calidad (todo el job, un pozo, o un pozo+stage)
    Quality {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long)]
        well: Option<String>,
        #[arg(long, requires = "well")]
        stage: Option<String>,
    },
}

fn parse_well(s: &str) -> Result<WellSpec, String> {
    let (name, stages) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("se esperaba NOMBRE=STAGES, llegó {:?}", s))?;
    let stages: u32 = stages
        .trim()
        .parse()
        .map_err(|_| format!("cantidad de stages inválida en {:?}", s))?;
    Ok(WellSpec {
        name: name.trim().to_string(),
        stages,
    })
}

/* ---------------- origen de los datos ---------------- */

struct Remote {
    client: Client,
    base_url: String,
}

impl Remote {
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("KPI_SERVER_URL inválida: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("KPI_SERVER_URL no puede ser base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let resp = self.client.get(self.url(segments)?).send().await?;
        decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T> {
        let resp = self.client.post(self.url(segments)?).json(body).send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    match resp.json::<ApiError>().await {
        Ok(err) => bail!("{} ({}, status {})", err.message, err.error, status),
        Err(_) => bail!("error del server (status {})", status),
    }
}

enum Source {
    Remote(Remote),
    Export(Viewer),
}

impl Source {
    fn remote(&self) -> Result<&Remote> {
        match self {
            Source::Remote(r) => Ok(r),
            Source::Export(_) => bail!("--export es de sólo lectura: no se puede guardar"),
        }
    }

    async fn jobs(&self) -> Result<Vec<JobSummary>> {
        match self {
            Source::Remote(r) => r.get(&["api", "v1", "jobs"]).await,
            Source::Export(v) => Ok(v.jobs()?),
        }
    }

    async fn job(&self, id: &str) -> Result<Job> {
        match self {
            Source::Remote(r) => r.get(&["api", "v1", "jobs", id]).await,
            Source::Export(v) => Ok(v.job(id)?),
        }
    }

    async fn progress(&self, id: &str) -> Result<Vec<WellProgress>> {
        match self {
            Source::Remote(r) => r.get(&["api", "v1", "jobs", id, "progress"]).await,
            Source::Export(v) => Ok(v.progress(id)?),
        }
    }

    async fn timeline(&self, id: &str) -> Result<Vec<TimelineRow>> {
        match self {
            Source::Remote(r) => r.get(&["api", "v1", "jobs", id, "timeline"]).await,
            Source::Export(v) => Ok(v.timeline(id)?),
        }
    }

    async fn quality(&self, id: &str) -> Result<Vec<QualityRow>> {
        match self {
            Source::Remote(r) => r.get(&["api", "v1", "jobs", id, "quality"]).await,
            Source::Export(v) => Ok(v.quality(id)?),
        }
    }

    async fn quality_lookup(&self, id: &str, well: &str, stage: &str) -> Result<QualityLookup> {
        match self {
            Source::Remote(r) => {
                r.get(&["api", "v1", "jobs", id, "quality", well, stage])
                    .await
            }
            Source::Export(v) => Ok(v.quality_lookup(id, well, stage)?),
        }
    }
}

/* ---------------- salida ---------------- */

fn print_saved(what: &str, saved: &SaveResponse) {
    println!("{} guardado.", what);
    println!("  job: {}", saved.job_id);
    println!("  version: {}", saved.version);
}

fn print_job(id: &str, job: &Job) {
    println!("Job: {} - {} ({})", id, job.pad, job.operator);
    println!("  version: {}", job.version);
    println!("  pozos:");
    for (well, total) in &job.wells {
        println!("    - {}: {} stages", well, total);
    }
    println!("  entradas KPI: {}", job.stage_log.len());
    let quality: usize = job.quality.values().map(|m| m.len()).sum();
    println!("  entradas de calidad: {}", quality);
}

fn print_progress(rows: &[WellProgress]) {
    println!("{:<20} {:>10} {:>8} {:>10}", "Pozo", "Completos", "Total", "Progreso");
    for r in rows {
        println!(
            "{:<20} {:>10} {:>8} {:>9.2}%",
            r.well, r.completed, r.total, r.percent
        );
        if r.out_of_range > 0 {
            println!("    ({} entradas con stage fuera de 1..={})", r.out_of_range, r.total);
        }
    }
}

fn print_quality_row(row: &QualityRow) {
    println!("Pozo {} - Stage {}", row.well, row.stage);
    println!("  Pre Sand : {}", row.entry.pre_sand);
    println!("  Post Sand: {}", row.entry.post_sand);
    println!("  SPP      : {}", row.entry.spp);
    println!("  Comment  : {}", row.entry.comment);
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let source = match &cli.export {
        Some(path) => {
            let store = ExportStore::open(path)
                .with_context(|| format!("abriendo export {}", path.display()))?;
            Source::Export(Viewer::new(Arc::new(store)))
        }
        None => Source::Remote(Remote {
            client: Client::new(),
            base_url: server_base_url(),
        }),
    };

    match cli.command {
        Commands::Jobs => {
            let jobs = source.jobs().await?;
            if jobs.is_empty() {
                println!("No hay jobs cargados.");
            }
            for j in jobs {
                println!(
                    "{}  operador={} pad={} pozos={} stages={}/{} (v{})",
                    j.id, j.operator, j.pad, j.wells, j.logged_stages, j.total_stages, j.version
                );
            }
        }

        Commands::Show { id } => {
            let job = source.job(&id).await?;
            print_job(&id, &job);
        }

        Commands::CreateJob {
            id,
            operator,
            pad,
            wells,
            overwrite,
        } => {
            let req = CreateJobRequest {
                job_id: id,
                operator,
                pad,
                wells,
                overwrite,
            };
            let saved: SaveResponse = source.remote()?.post(&["api", "v1", "jobs"], &req).await?;
            print_saved("Job", &saved);
        }

        Commands::AddStage {
            id,
            well,
            stage,
            date,
            start,
            end,
        } => {
            let req = StageTimingRequest {
                well,
                stage,
                date: date.unwrap_or_else(|| Local::now().date_naive()),
                start_time: start,
                end_time: end,
            };
            let saved: SaveResponse = source
                .remote()?
                .post(&["api", "v1", "jobs", id.as_str(), "stages"], &req)
                .await?;
            print_saved("KPI", &saved);
            let key = common::stage_key(&req.well, req.stage);
            if let Some(entry) = saved.job.stage_log.get(&key) {
                println!("  {}: {} -> {} ({:.2} h)", key, entry.start, entry.end, entry.duration_hr);
            }
        }

        Commands::AddQuality {
            id,
            well,
            stage,
            pre_sand,
            post_sand,
            spp,
            comment,
        } => {
            let req = QualityRequest {
                well,
                stage,
                pre_sand,
                post_sand,
                spp,
                comment,
            };
            let saved: SaveResponse = source
                .remote()?
                .post(&["api", "v1", "jobs", id.as_str(), "quality"], &req)
                .await?;
            print_saved("Calidad", &saved);
        }

        Commands::Progress { id, csv } => {
            let rows = source.progress(&id).await?;
            if csv {
                write_progress_csv(&rows, std::io::stdout())?;
            } else {
                print_progress(&rows);
            }
        }

        Commands::Timeline { id } => {
            let rows = source.timeline(&id).await?;
            if rows.is_empty() {
                println!("Sin entradas KPI todavía.");
            }
            for r in rows {
                println!(
                    "{:<20} s{:<4} {} -> {} ({:.2} h)",
                    r.well, r.stage, r.start, r.end, r.duration_hr
                );
            }
        }

        Commands::Quality { id, well, stage } => match (well, stage) {
            (Some(well), Some(stage)) => match source.quality_lookup(&id, &well, &stage).await? {
                QualityLookup::Found { well, stage, entry } => {
                    print_quality_row(&QualityRow { well, stage, entry });
                }
                QualityLookup::NoData { well, stage } => {
                    println!("Sin datos de calidad para el pozo {} stage {}.", well, stage);
                }
            },
            (Some(well), None) => {
                let job = source.job(&id).await?;
                let stages = viewer::quality_stages(&job, &well);
                if stages.is_empty() {
                    println!("Sin datos de calidad para este pozo.");
                }
                for stage in stages {
                    if let QualityLookup::Found { well, stage, entry } =
                        viewer::quality_lookup(&job, &well, &stage)
                    {
                        print_quality_row(&QualityRow { well, stage, entry });
                    }
                }
            }
            _ => {
                let rows = source.quality(&id).await?;
                if rows.is_empty() {
                    println!("No hay entradas de calidad.");
                }
                for row in &rows {
                    print_quality_row(row);
                }
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_es_valida() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_well_separa_nombre_y_stages() {
        let w = parse_well("Smith 1H=40").unwrap();
        assert_eq!(w.name, "Smith 1H");
        assert_eq!(w.stages, 40);

        // el último '=' separa
        assert_eq!(parse_well("A=B=3").unwrap().name, "A=B");
        assert!(parse_well("W1").is_err());
        assert!(parse_well("W1=muchos").is_err());
    }

    #[test]
    fn create_job_acepta_varios_pozos() {
        let cli = Cli::try_parse_from([
            "client", "create-job", "J1", "--operator", "Acme", "--well", "W1=2", "--well", "W2=4",
        ])
        .unwrap();
        match cli.command {
            Commands::CreateJob { id, wells, overwrite, .. } => {
                assert_eq!(id, "J1");
                assert_eq!(wells.len(), 2);
                assert!(!overwrite);
            }
            _ => panic!("subcomando inesperado"),
        }
    }

    #[test]
    fn url_codifica_segmentos() {
        let r = Remote {
            client: Client::new(),
            base_url: "http://localhost:8080".to_string(),
        };
        let url = r.url(&["api", "v1", "jobs", "J 1", "quality", "W/1", "2"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/jobs/J%201/quality/W%2F1/2");
    }
}
