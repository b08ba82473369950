//! # Pipeline module
//!
//! This module provide the rotation pipeline. Steps run one after another,
//! the run aborts if the context, the issuance or the encoding fails and
//! keeps going with a logged failure for every other step.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::svc::{
    certificate::{
        encoder::{self, Base64Encoder, Material},
        issuer::{self, Certbot, CertificateIssuer, Request},
        Location,
    },
    cfg::{Mode, Runtime},
    k8s::{
        self, openshift,
        secret::{self, Publication, TlsSecret},
    },
    pacing::{self, Backoff},
};

pub mod context;

pub use context::Context;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build rotation context, {0}")]
    Context(context::Error),
    #[error("failed to issue certificate, {0}")]
    Issue(issuer::Error),
    #[error("failed to encode certificate material, {0}")]
    Encode(encoder::Error),
}

// -----------------------------------------------------------------------------
// Step enumeration

/// Steps whose failure does not abort the run
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Step {
    Publish,
    Converge,
    Lookup,
    IngressController,
    ApiServer,
    Console,
    Cleanup,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Converge => write!(f, "converge"),
            Self::Lookup => write!(f, "lookup"),
            Self::IngressController => write!(f, "ingress-controller"),
            Self::ApiServer => write!(f, "api-server"),
            Self::Console => write!(f, "console"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

// -----------------------------------------------------------------------------
// Report structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Outcome {
    Succeeded,
    Skipped,
    Failed(String),
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Record {
    pub step: Step,
    /// namespace the step applied to, if any
    pub target: Option<String>,
    pub outcome: Outcome,
}

#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Report {
    pub records: Vec<Record>,
}

impl Report {
    pub fn push(&mut self, step: Step, target: Option<&str>, outcome: Outcome) {
        self.records.push(Record {
            step,
            target: target.map(ToOwned::to_owned),
            outcome,
        });
    }

    pub fn failures(&self) -> Vec<&Record> {
        self.records
            .iter()
            .filter(|record| matches!(record.outcome, Outcome::Failed(_)))
            .collect()
    }

    pub fn outcomes(&self, step: Step) -> Vec<&Outcome> {
        self.records
            .iter()
            .filter(|record| record.step == step)
            .map(|record| &record.outcome)
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Pipeline structure

pub struct Pipeline {
    runtime: Runtime,
    issuer: Arc<dyn CertificateIssuer>,
    encoder: Arc<dyn Base64Encoder>,
}

impl From<Runtime> for Pipeline {
    fn from(runtime: Runtime) -> Self {
        let issuer = Arc::new(Certbot::from(&runtime.certificate));
        let encoder = encoder::from_encoding(runtime.certificate.encoding);

        Self::new(runtime, issuer, encoder)
    }
}

impl Pipeline {
    pub fn new(
        runtime: Runtime,
        issuer: Arc<dyn CertificateIssuer>,
        encoder: Arc<dyn Base64Encoder>,
    ) -> Self {
        Self {
            runtime,
            issuer,
            encoder,
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub async fn run(&self) -> Result<Report, Error> {
        info!("Mission start");
        if self.runtime.test {
            info!("Running in test mode, certificates are issued by the staging authority");
        }

        let delay = Duration::from_millis(self.runtime.pacing.delay);
        let context = Context::build(&self.runtime)
            .await
            .map_err(Error::Context)?;

        pacing::wait(delay).await;
        self.issue().await?;
        pacing::wait(delay).await;

        let material = encoder::encode(&*self.encoder, &Location::from(&self.runtime))
            .await
            .map_err(Error::Encode)?;

        let mut report = Report::default();
        self.publish(&context, &material, &mut report).await;
        self.converge(&context, &mut report).await;

        let previous = match self.runtime.secret.mode {
            Mode::Rotate => context.previous.to_owned(),
            Mode::Fixed => self.lookup(&context, &mut report).await,
        };

        self.update_ingress_controller(&context, &mut report).await;
        self.update_api_server(&context, &mut report).await;
        self.update_console(&context, &mut report).await;
        self.cleanup(&context, previous.as_deref(), &mut report).await;
        pacing::wait(delay).await;

        info!(
            secret = &context.secret_name,
            failures = report.failures().len(),
            "Mission complete"
        );
        Ok(report)
    }

    async fn issue(&self) -> Result<(), Error> {
        let request = Request::from(&self.runtime);

        info!(domains = request.domains.join(","), "Generating certificates");
        self.issuer.issue(&request).await.map_err(Error::Issue)
    }

    async fn publish(&self, context: &Context, material: &Material, report: &mut Report) {
        info!(secret = &context.secret_name, "Creating new tls secrets");
        for namespace in &self.runtime.cluster.namespaces {
            let payload = TlsSecret::new(&context.secret_name, Some(namespace.to_owned()), material);
            let result = match self.runtime.secret.mode {
                Mode::Rotate => secret::create(context.client.to_owned(), namespace, &payload)
                    .await
                    .map(|_| Publication::Created),
                Mode::Fixed => secret::upsert(context.client.to_owned(), namespace, &payload).await,
            };

            match result {
                Ok(publication) => {
                    info!(
                        secret = &context.secret_name,
                        namespace = namespace,
                        publication = publication.to_string(),
                        "Published tls secret"
                    );
                    report.push(Step::Publish, Some(namespace), Outcome::Succeeded);
                }
                Err(err) => {
                    error!(
                        secret = &context.secret_name,
                        namespace = namespace,
                        status = k8s::status(&err),
                        error = err.to_string(),
                        "Failed to publish tls secret"
                    );
                    report.push(Step::Publish, Some(namespace), Outcome::Failed(err.to_string()));
                }
            }
        }
    }

    async fn converge(&self, context: &Context, report: &mut Report) {
        let backoff = Backoff::from(&self.runtime.pacing);
        let result = pacing::poll_until(&backoff, "secret is readable in every namespace", || {
            let client = context.client.to_owned();
            let name = context.secret_name.to_owned();
            let namespaces = self.runtime.cluster.namespaces.to_owned();

            async move {
                for namespace in &namespaces {
                    match secret::get(client.to_owned(), namespace, &name).await {
                        Ok(Some(_)) => {}
                        Ok(None) => return false,
                        Err(err) => {
                            debug!(namespace = namespace, error = err.to_string(), "Could not read secret");
                            return false;
                        }
                    }
                }

                true
            }
        })
        .await;

        match result {
            Ok(_) => report.push(Step::Converge, None, Outcome::Succeeded),
            Err(err) => {
                warn!(error = err.to_string(), "Secret did not converge, keep going");
                report.push(Step::Converge, None, Outcome::Failed(err.to_string()));
            }
        }
    }

    async fn lookup(&self, context: &Context, report: &mut Report) -> Option<String> {
        match openshift::default_certificate(context.client.to_owned()).await {
            Ok(previous) => {
                report.push(Step::Lookup, None, Outcome::Succeeded);
                previous
            }
            Err(err) => {
                warn!(
                    status = k8s::status(&err),
                    error = err.to_string(),
                    "Failed to retrieve the certificate of the default ingress controller, cleanup will be skipped"
                );
                report.push(Step::Lookup, None, Outcome::Failed(err.to_string()));
                None
            }
        }
    }

    async fn update_ingress_controller(&self, context: &Context, report: &mut Report) {
        info!("Updating the ingress controller default certificate");
        let result =
            openshift::patch_ingress_controller(context.client.to_owned(), &context.secret_name)
                .await;

        record(report, Step::IngressController, None, result);
    }

    async fn update_api_server(&self, context: &Context, report: &mut Report) {
        info!("Updating the api server serving certificates");
        let result = openshift::patch_api_server(
            context.client.to_owned(),
            &self.runtime.api_hostname(),
            &context.secret_name,
        )
        .await;

        record(report, Step::ApiServer, None, result);
    }

    async fn update_console(&self, context: &Context, report: &mut Report) {
        if !self.runtime.console.enabled {
            debug!("Console update is disabled");
            report.push(Step::Console, None, Outcome::Skipped);
            return;
        }

        info!("Updating the console serving certificate");
        let result = openshift::patch_console(
            context.client.to_owned(),
            &self.runtime.console_hostname(),
            &context.secret_name,
        )
        .await;

        record(report, Step::Console, None, result);
    }

    async fn cleanup(&self, context: &Context, previous: Option<&str>, report: &mut Report) {
        let previous = match previous {
            Some(previous) if previous != context.secret_name => previous,
            previous => {
                info!(
                    previous = previous.unwrap_or("<none>"),
                    "No stale certificate secret to delete"
                );
                report.push(Step::Cleanup, None, Outcome::Skipped);
                return;
            }
        };

        info!(secret = previous, "Deleting the previous certificate secret");
        for namespace in &self.runtime.cluster.namespaces {
            let result = secret::delete(context.client.to_owned(), namespace, previous).await;

            record(report, Step::Cleanup, Some(namespace), result);
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

fn record<T>(report: &mut Report, step: Step, target: Option<&str>, result: Result<T, kube::Error>) {
    match result {
        Ok(_) => {
            info!(step = step.to_string(), target = target.unwrap_or("<cluster>"), "Step succeeded");
            report.push(step, target, Outcome::Succeeded);
        }
        Err(err) => {
            error!(
                step = step.to_string(),
                target = target.unwrap_or("<cluster>"),
                status = k8s::status(&err),
                error = err.to_string(),
                "Step failed"
            );
            report.push(step, target, Outcome::Failed(err.to_string()));
        }
    }
}
