//! The per-source sync controller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use calendar::{period_bounds, periods_between};
use canonical_store::CanonicalStore;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use format_readers::{is_compressed, reader_for, unpack, SourceImage};
use region_grid::{Grid, Region, RegionProvider};
use resample::{average_layers, resample_to_grid, scale_values};
use source_walker::{
    FtpSource, HttpSource, LocalSource, RemoteProtocol, SftpSource, Walker,
};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::{PipelinePaths, Protocol, Result, SourceDescriptor, SyncError};

/// Outcome of one calendar step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// At least one variable was written for at least one region.
    Written,
    /// The remote had nothing for the period; the step stays absent.
    NoData,
}

/// Result of one sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub steps_written: usize,
    pub steps_skipped: usize,
    pub files_fetched: usize,
    /// True when the run stopped early on the shutdown signal; the
    /// store is left in a valid, resumable state.
    pub cancelled: bool,
}

/// Result of a gap-filling pass.
#[derive(Debug, Default)]
pub struct GapReport {
    /// Steps that were gaps when the scan started.
    pub found: Vec<NaiveDate>,
    /// Gaps that received data during this pass.
    pub filled: Vec<NaiveDate>,
    /// Gaps the remote still has no data for. Reported, not an error.
    pub remaining: Vec<NaiveDate>,
}

/// One region's resampling target: its grid and canonical store.
struct Target {
    region: Region,
    grid: Grid,
    store: CanonicalStore,
}

/// Orchestrates sync and gap filling for one source.
///
/// Steps are processed strictly in increasing date order, so the
/// store's last non-empty step always reflects a contiguous prefix;
/// that is what makes the resume-date computation correct without
/// scanning the entire time axis.
pub struct SyncController {
    descriptor: SourceDescriptor,
    paths: PipelinePaths,
    regions: Arc<dyn RegionProvider>,
}

impl SyncController {
    /// Register a source. The descriptor is validated here; a bad
    /// configuration never constructs a controller.
    pub fn new(
        descriptor: SourceDescriptor,
        paths: PipelinePaths,
        regions: Arc<dyn RegionProvider>,
    ) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            descriptor,
            paths,
            regions,
        })
    }

    /// The descriptor this controller runs.
    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Synchronize the store with the remote source.
    ///
    /// Without an explicit `begin` the run resumes from the last
    /// durably written step. Cancellation is honored between steps
    /// only, leaving every completed step durable.
    #[instrument(skip(self, shutdown), fields(source = %self.descriptor.name))]
    pub async fn sync(
        &self,
        begin: Option<NaiveDate>,
        end: Option<NaiveDate>,
        delete_raw: bool,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SyncReport> {
        let mut targets = self.resolve_targets()?;

        let begin = match begin {
            Some(begin) => begin,
            None => self.compute_resume_date(&targets)?,
        };
        let end = end.unwrap_or_else(|| Utc::now().date_naive());

        let mut report = SyncReport::default();
        if begin > end {
            info!("everything up to date");
            return Ok(report);
        }

        let steps = periods_between(self.descriptor.dest_temp_res, begin, end);
        info!(
            begin = %begin,
            end = %end,
            steps = steps.len(),
            "starting sync run"
        );

        for (i, &step) in steps.iter().enumerate() {
            if shutdown.try_recv().is_ok() {
                info!(step = %step, "cancelled between steps");
                report.cancelled = true;
                break;
            }

            let start = if i == 0 {
                begin
            } else {
                steps[i - 1] + Duration::days(1)
            };

            match self.sync_step(start, step, &mut targets, delete_raw, &mut report).await? {
                StepOutcome::Written => report.steps_written += 1,
                StepOutcome::NoData => {
                    info!(step = %step, "no data available for period");
                    report.steps_skipped += 1;
                }
            }
        }

        info!(
            written = report.steps_written,
            skipped = report.steps_skipped,
            fetched = report.files_fetched,
            "sync run finished"
        );
        Ok(report)
    }

    /// Detect gaps in `[begin, end]` and re-sync each gap period.
    ///
    /// A step is a gap when every variable's array at that step is
    /// absent or entirely invalid. Gaps the remote still cannot fill
    /// remain in the report; they are not an error.
    #[instrument(skip(self, shutdown), fields(source = %self.descriptor.name))]
    pub async fn fill_gaps(
        &self,
        begin: Option<NaiveDate>,
        end: Option<NaiveDate>,
        delete_raw: bool,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<GapReport> {
        let targets = self.resolve_targets()?;
        let mut report = GapReport::default();

        report.found = self.scan_gaps(&targets, begin, end)?;
        if report.found.is_empty() {
            info!("no gaps found");
            return Ok(report);
        }

        info!(gaps = report.found.len(), "attempting to fill gaps");
        for &gap in &report.found {
            if shutdown.try_recv().is_ok() {
                info!("cancelled during gap filling");
                break;
            }
            let (start, stop) = period_bounds(self.descriptor.dest_temp_res, gap);
            self.sync(Some(start), Some(stop), delete_raw, shutdown)
                .await?;
        }

        let still_gaps = self.scan_gaps(&targets, begin, end)?;
        for gap in report.found.clone() {
            if still_gaps.contains(&gap) {
                report.remaining.push(gap);
            } else {
                report.filled.push(gap);
            }
        }

        info!(
            filled = report.filled.len(),
            remaining = report.remaining.len(),
            "gap filling finished"
        );
        Ok(report)
    }

    /// Resolve regions, build grids and open stores.
    ///
    /// A failing region is skipped so the remaining regions of the
    /// source still sync; with no usable region at all the error is
    /// fatal for this source.
    fn resolve_targets(&self) -> Result<Vec<Target>> {
        let mut targets = Vec::new();
        let mut first_error: Option<SyncError> = None;

        for code in &self.descriptor.regions {
            let resolved = self.regions.region(code).and_then(|region| {
                let grid = Grid::build(&region, self.descriptor.sp_res)?;
                Ok((region, grid))
            });
            match resolved {
                Ok((region, grid)) => {
                    let store = CanonicalStore::create_or_open(
                        &self.paths.data_dir,
                        region.code(),
                        self.descriptor.sp_res,
                        self.descriptor.dest_temp_res,
                        &grid,
                        self.descriptor.start_date,
                    )?;
                    targets.push(Target {
                        region,
                        grid,
                        store,
                    });
                }
                Err(e) => {
                    error!(region = %code, error = %e, "skipping unusable region");
                    first_error.get_or_insert(SyncError::Region(e));
                }
            }
        }

        match (targets.is_empty(), first_error) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(SyncError::Config(format!(
                "source {} has no usable region",
                self.descriptor.name
            ))),
            _ => Ok(targets),
        }
    }

    /// Earliest date the sync must re-check.
    ///
    /// The later of the provider's earliest data and the dataset start,
    /// or the day after the oldest last-non-empty step of any variable
    /// in any region; moved one period back to close boundary gaps and
    /// clamped to never precede the dataset start.
    fn compute_resume_date(&self, targets: &[Target]) -> Result<NaiveDate> {
        let effective_start = self.descriptor.effective_start();

        let mut resume: Option<NaiveDate> = None;
        for target in targets {
            for variable in &self.descriptor.variables {
                let name = self.descriptor.store_variable(variable);
                let candidate = match target.store.last_non_empty_step(&name)? {
                    Some(last) => last + Duration::days(1),
                    None => effective_start,
                };
                resume = Some(match resume {
                    Some(current) if current <= candidate => current,
                    _ => candidate,
                });
            }
        }

        let resume = resume.unwrap_or(effective_start);
        let (previous_start, _) = period_bounds(
            self.descriptor.dest_temp_res,
            resume - Duration::days(1),
        );
        Ok(previous_start.max(effective_start))
    }

    /// Fetch, resample and write one calendar step.
    async fn sync_step(
        &self,
        start: NaiveDate,
        step: NaiveDate,
        targets: &mut [Target],
        delete_raw: bool,
        report: &mut SyncReport,
    ) -> Result<StepOutcome> {
        let period_begin = start.and_hms_opt(0, 0, 0).expect("midnight");
        let period_end = step.and_hms_opt(23, 59, 59).expect("end of day");

        let mut walker = self.make_walker();
        let summary = walker.run(period_begin, period_end).await?;
        report.files_fetched += summary.downloaded.len();

        let files = self.raw_files_in_period(period_begin, period_end)?;
        if files.is_empty() {
            return Ok(StepOutcome::NoData);
        }

        let mut written = false;
        for target in targets.iter_mut() {
            if self.resample_step_for_target(&files, step, target)? {
                written = true;
            }
        }

        if delete_raw {
            for (path, _) in &files {
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(path)
                } else {
                    std::fs::remove_file(path)
                };
                if let Err(e) = removed {
                    warn!(path = %path.display(), error = %e, "failed to delete raw file");
                }
            }
        }

        if written {
            Ok(StepOutcome::Written)
        } else {
            Ok(StepOutcome::NoData)
        }
    }

    /// Resample every file of the period and write the step for one
    /// region. Returns whether anything was written.
    fn resample_step_for_target(
        &self,
        files: &[(PathBuf, NaiveDateTime)],
        step: NaiveDate,
        target: &mut Target,
    ) -> Result<bool> {
        // Per-variable stacks of canonical-grid layers.
        let mut stacks: BTreeMap<&str, Vec<Vec<f32>>> = BTreeMap::new();
        let mut metadata: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();

        for (path, _date) in files {
            let readable = if is_compressed(path) {
                unpack(path)?
            } else {
                path.clone()
            };

            let reader = reader_for(&readable, target.region.bbox())?;
            let image = match reader.read(&readable) {
                Ok(image) => image,
                Err(e) => {
                    warn!(path = %readable.display(), error = %e, "skipping undecodable file");
                    continue;
                }
            };

            for variable in &self.descriptor.variables {
                let Some(data) = select_variable(&image, variable) else {
                    continue;
                };

                let mut layer = resample_to_grid(
                    data,
                    &image.lons,
                    &image.lats,
                    &target.grid,
                    self.descriptor.nan_value,
                )?;
                if let (Some(data_range), Some(valid_range)) =
                    (self.descriptor.data_range, self.descriptor.valid_range)
                {
                    scale_values(&mut layer, data_range, valid_range);
                }

                stacks.entry(variable).or_default().push(layer);

                let meta = metadata.entry(variable).or_default();
                if let Some(attrs) = image
                    .metadata
                    .get(variable)
                    .or_else(|| image.metadata.get("dataset"))
                {
                    meta.extend(attrs.clone());
                }
                if let Some(unit) = &self.descriptor.unit {
                    meta.insert("units".to_string(), unit.clone());
                }
            }
        }

        let mut written = false;
        for (variable, layers) in stacks {
            let array = average_layers(&layers)?;
            let name = self.descriptor.store_variable(variable);
            let meta = metadata.remove(variable).unwrap_or_default();
            target.store.write_step(&name, step, &array, &meta)?;
            written = true;
        }

        Ok(written)
    }

    /// Raw files on disk whose filename-decoded date falls in the period.
    ///
    /// The raw directory is re-scanned rather than trusting the walk
    /// summary, so files fetched by earlier interrupted runs are picked
    /// up too.
    fn raw_files_in_period(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<(PathBuf, NaiveDateTime)>> {
        let mut files = Vec::new();
        if !self.paths.raw_dir.exists() {
            return Ok(files);
        }

        for entry in std::fs::read_dir(&self.paths.raw_dir)? {
            let entry = entry?;
            // Container formats (Zarr groups) are directories on disk.
            if !entry.path().is_file() && !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(filter) = &self.descriptor.file_filter {
                if !name.contains(filter.as_str()) {
                    continue;
                }
            }
            let Ok(date) = self.descriptor.filedate.parse(&name) else {
                continue;
            };
            if date >= begin && date <= end {
                files.push((entry.path(), date));
            }
        }

        files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(files)
    }

    /// Canonical steps in range where every variable is absent or empty.
    fn scan_gaps(
        &self,
        targets: &[Target],
        begin: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<NaiveDate>> {
        let begin = begin.unwrap_or_else(|| self.descriptor.effective_start());

        let mut gaps = Vec::new();
        for target in targets {
            // Without an explicit end, scan up to the last step present.
            let end = match end {
                Some(end) => end,
                None => {
                    let mut last: Option<NaiveDate> = None;
                    for variable in &self.descriptor.variables {
                        let name = self.descriptor.store_variable(variable);
                        if let Some(date) = target.store.steps(&name)?.last().copied() {
                            last = Some(last.map_or(date, |l: NaiveDate| l.max(date)));
                        }
                    }
                    match last {
                        Some(last) => last,
                        None => continue,
                    }
                }
            };

            for step in periods_between(self.descriptor.dest_temp_res, begin, end) {
                let mut has_data = false;
                for variable in &self.descriptor.variables {
                    let name = self.descriptor.store_variable(variable);
                    if target.store.has_step(&name, step)
                        && !target.store.step_is_empty(&name, step)?
                    {
                        has_data = true;
                        break;
                    }
                }
                if !has_data && !gaps.contains(&step) {
                    gaps.push(step);
                }
            }
        }

        gaps.sort();
        Ok(gaps)
    }

    /// Build a walker over this source's protocol backend.
    fn make_walker(&self) -> Walker {
        let protocol: Box<dyn RemoteProtocol> = match self.descriptor.protocol {
            Protocol::Ftp => Box::new(FtpSource::new(
                self.descriptor.host.clone(),
                self.descriptor.port,
                self.descriptor.username.clone(),
                self.descriptor.password.clone(),
            )),
            Protocol::Sftp => Box::new(SftpSource::new(
                self.descriptor.host.clone(),
                self.descriptor.port,
                self.descriptor.username.clone().unwrap_or_default(),
                self.descriptor.password.clone().unwrap_or_default(),
            )),
            Protocol::Http => Box::new(HttpSource::new(self.descriptor.host.clone())),
            Protocol::Local => Box::new(LocalSource::new(self.descriptor.host.clone())),
        };

        Walker::new(
            protocol,
            self.descriptor.directory.clone(),
            self.descriptor.dir_structure.clone(),
            self.descriptor.filedate.clone(),
            self.paths.raw_dir.clone(),
        )
        .with_file_filter(self.descriptor.file_filter.clone())
    }
}

/// Pick the array for a configured variable out of a decoded image.
///
/// Sources that deliver unnamed single-band files expose them as
/// `dataset`; a single configured variable maps onto that band.
fn select_variable<'a>(image: &'a SourceImage, variable: &str) -> Option<&'a Vec<f32>> {
    image
        .variables
        .get(variable)
        .or_else(|| image.variables.get("dataset"))
}
