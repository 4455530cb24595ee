//! Mirroring executor
//!
//! Takes a request, matches rules, performs the transfer for every matching
//! rule and aggregates the outcome. Transfer modes:
//!
//! - **passthrough** — no transform, size at or above the stream threshold:
//!   server-side copy on the same backend, streamed byte copy otherwise
//! - **buffered** — no transform, below the threshold: download then upload
//! - **streamed-transform** — codec stages between a reader and a writer,
//!   one codec window in flight
//! - **partitioned** — the payload is split at record boundaries; each part
//!   runs the per-part pipeline and lands on its own destination URL

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use objmirror_common::{url, MirrorError, Result};

use crate::codec;
use crate::config::rule::{Action, ActionKind};
use crate::config::{Config, Resource, Rule, RuleSet};
use crate::notify::Notifier;
use crate::response::{Request, Response, SharedResponse};
use crate::secret::SecretService;
use crate::split::Partitioner;
use crate::storage::{ObjectInfo, StorageRegistry};
use crate::template;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

struct Inner {
    rules: RuleSet,
    storage: Arc<StorageRegistry>,
    secrets: SecretService,
    notifier: Arc<dyn Notifier>,
}

/// The mirroring service: rule set, storage, secrets and notifier
#[derive(Clone)]
pub struct MirrorService {
    inner: Arc<Inner>,
}

impl MirrorService {
    /// Build the service from a loaded configuration
    pub async fn new(
        config: &Config,
        storage: Arc<StorageRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let rules = RuleSet::init(config.rule_set(), &storage).await?;
        let service = Self {
            inner: Arc::new(Inner {
                rules,
                storage,
                secrets: SecretService::new(),
                notifier,
            }),
        };
        service.refresh_secrets().await?;
        Ok(service)
    }

    /// Build the service from the `CONFIG` environment variable
    pub async fn from_env(
        storage: Arc<StorageRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let config = Config::from_env(&storage).await?;
        Self::new(&config, storage, notifier).await
    }

    pub fn storage(&self) -> &Arc<StorageRegistry> {
        &self.inner.storage
    }

    /// Atomic snapshot of the current rules
    pub fn rules(&self) -> Arc<Vec<Rule>> {
        self.inner.rules.current()
    }

    async fn refresh_secrets(&self) -> Result<()> {
        let snapshot = self.inner.rules.current();
        let resources: Vec<&Resource> =
            snapshot.iter().flat_map(|rule| rule.resources()).collect();
        self.inner.secrets.init(&self.inner.storage, &resources).await
    }

    /// Reload the rule set when its store changed, re-materializing secrets
    pub async fn reload_if_needed(&self) -> Result<bool> {
        let changed = self.inner.rules.reload_if_needed(&self.inner.storage).await?;
        if changed {
            info!("rule set changed, refreshing credentials");
            self.refresh_secrets().await?;
        }
        Ok(changed)
    }

    /// Mirror one object. Terminal errors land in the response; the call
    /// itself never fails.
    pub async fn mirror(&self, request: Request) -> Response {
        let response = SharedResponse::new(&request);
        if let Err(err) = self.mirror_inner(&request, &response).await {
            record_failure(&response, &request.source_url, err);
        }
        let response = response.finalize();
        debug!(
            status = %response.status,
            url = %request.source_url,
            elapsed_ms = response.time_taken_ms,
            "mirror finished"
        );
        response
    }

    async fn mirror_inner(&self, request: &Request, response: &SharedResponse) -> Result<()> {
        // A reload failure keeps the previous snapshot active; it must not
        // fail the transfer itself.
        if let Err(err) = self.reload_if_needed().await {
            warn!(error = %err, "rule reload failed, keeping previous snapshot");
        }

        let snapshot = self.inner.rules.current();
        response.set_total_rules(snapshot.len());
        let matched: Vec<Rule> = snapshot
            .iter()
            .filter(|rule| rule.matches(&request.source_url))
            .cloned()
            .collect();
        if matched.is_empty() {
            debug!(url = %request.source_url, "no rule matched");
            response.set_noop();
            return Ok(());
        }

        let object = match self.inner.storage.metadata(&request.source_url).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => {
                response.set_not_found(&request.source_url);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        response.set_file_size(object.size);
        if let Some(first) = matched.first() {
            response.set_rule(first.clone());
        }

        // One task per matching rule; match counts are tiny, so fan-out is
        // unbounded here (the cron path is the one with a fixed pool).
        let mut handles: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();
        for rule in matched {
            let service = self.clone();
            let object = object.clone();
            let request = request.clone();
            let response = response.clone();
            let rule_id = rule.id();
            handles.push((
                rule_id,
                tokio::spawn(async move {
                    service.apply_rule(&rule, &object, &request, &response).await
                }),
            ));
        }
        for (rule_id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => record_rule_failure(response, &rule_id, &request.source_url, err),
                Err(join_err) => {
                    response.set_error(&format!("rule '{}' task failed: {}", rule_id, join_err))
                }
            }
        }
        Ok(())
    }

    async fn apply_rule(
        &self,
        rule: &Rule,
        object: &ObjectInfo,
        request: &Request,
        response: &SharedResponse,
    ) -> Result<()> {
        // Cloud backends consume these when opening connections; resolving
        // up front also fails fast on broken credential references.
        let _options = self
            .inner
            .secrets
            .storage_options(&self.inner.storage, &rule.source)
            .await?;
        debug!(rule = %rule.id(), url = %object.url, "applying rule");

        if rule.checksum_skip && self.destinations_match_checksum(rule, object).await? {
            debug!(url = %object.url, "destination checksum matches, skipping");
            response.mark_checksum_skip();
            response.add_copied(&object.url, &object.url);
            return Ok(());
        }

        let (succeeded, failures) = if rule.split_policy().is_some() {
            match self.transfer_partitioned(rule, object).await {
                Ok(urls) => (urls, Vec::new()),
                Err(err) => (Vec::new(), vec![(object.url.clone(), err)]),
            }
        } else {
            self.transfer_destinations(rule, object).await
        };

        for destination in &succeeded {
            response.add_url(destination);
            response.add_copied(&object.url, destination);
        }

        let mut failures = failures;
        if failures.is_empty() {
            if let Some(target) = &rule.notification {
                match self.publish(rule, object, request, response).await {
                    Ok(()) => {}
                    Err(err) => failures.push((target.target.clone(), err)),
                }
            }
        }

        if failures.is_empty() {
            self.run_actions(&rule.success_actions(), object, None, response)
                .await?;
            if rule.move_source {
                let new_home = succeeded.first().cloned().unwrap_or_default();
                response.add_moved(&object.url, &new_home);
            }
            return Ok(());
        }

        let joined = failures
            .iter()
            .map(|(target, err)| format!("{}: {}", target, err))
            .collect::<Vec<_>>()
            .join("; ");
        if let Err(err) = self
            .run_actions(&rule.on_failure, object, Some(&joined), response)
            .await
        {
            warn!(rule = %rule.id(), error = %err, "failure action failed");
        }
        // Preserve the schema classification when that is the whole story.
        if failures.len() == 1 && failures[0].1.is_schema() {
            let (_, err) = failures.remove(0);
            return Err(err);
        }
        Err(MirrorError::storage(&object.url, joined))
    }

    /// Whether every destination already holds the source object, by
    /// storage checksum. Only an untransformed copy can match; a missing
    /// checksum on either side disables the skip.
    async fn destinations_match_checksum(
        &self,
        rule: &Rule,
        object: &ObjectInfo,
    ) -> Result<bool> {
        if !codec::plan(rule, &object.name).is_identity() || rule.split_policy().is_some() {
            return Ok(false);
        }
        let Some(source_checksum) = &object.checksum else {
            return Ok(false);
        };
        let destinations = rule.destination_resources();
        if destinations.is_empty() {
            return Ok(false);
        }
        for dest in destinations {
            let dest_url = self.resolve_destination(rule, dest, object)?;
            match self.inner.storage.metadata(&dest_url).await {
                Ok(info) if info.checksum.as_deref() == Some(source_checksum) => {}
                Ok(_) => return Ok(false),
                Err(err) if err.is_not_found() => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Destination URL for one destination resource: the rule template when
    /// present, otherwise the destination base joined with the object's
    /// source-relative path (final segment renamed for the transform).
    fn resolve_destination(
        &self,
        rule: &Rule,
        dest: &Resource,
        object: &ObjectInfo,
    ) -> Result<String> {
        if let Some(tmpl) = &rule.destination_template {
            return template::expand(tmpl, &object.name, None);
        }
        let relative =
            url::relative_to(&rule.source.url, &object.url).unwrap_or(object.name.as_str());
        let name = codec::destination_name(rule, &object.name);
        let path = match relative.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", parent, name),
            None => name,
        };
        Ok(url::join(&dest.url, &path))
    }

    async fn transfer_destinations(
        &self,
        rule: &Rule,
        object: &ObjectInfo,
    ) -> (Vec<String>, Vec<(String, MirrorError)>) {
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for dest in rule.destination_resources() {
            let dest_url = match self.resolve_destination(rule, dest, object) {
                Ok(dest_url) => dest_url,
                Err(err) => {
                    failures.push((dest.url.clone(), err));
                    continue;
                }
            };
            match self.transfer_one(rule, object, &dest_url).await {
                Ok(()) => succeeded.push(dest_url),
                Err(err) => failures.push((dest_url, err)),
            }
        }
        (succeeded, failures)
    }

    async fn transfer_one(&self, rule: &Rule, object: &ObjectInfo, dest_url: &str) -> Result<()> {
        let storage = &self.inner.storage;
        let mut plan = codec::plan(rule, &object.name);
        if plan.is_identity() {
            if object.size >= rule.stream_threshold_bytes {
                if storage.same_backend(&object.url, dest_url) {
                    debug!(src = %object.url, dst = %dest_url, "server-side copy");
                    return storage.copy(&object.url, dest_url).await;
                }
                debug!(src = %object.url, dst = %dest_url, "streamed copy");
                let mut reader = storage.reader(&object.url).await?;
                let mut writer = storage.writer(dest_url).await?;
                tokio::io::copy(&mut reader, &mut writer).await?;
                writer.shutdown().await?;
                return Ok(());
            }
            debug!(src = %object.url, dst = %dest_url, "buffered copy");
            let data = storage.download(&object.url).await?;
            return storage.upload(dest_url, data).await;
        }

        debug!(src = %object.url, dst = %dest_url, "streamed transform");
        let mut reader = storage.reader(&object.url).await?;
        let mut writer = storage.writer(dest_url).await?;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let out = plan.pipeline.transform(&buf[..n])?;
            if !out.is_empty() {
                writer.write_all(&out).await?;
            }
            // Codec stages are CPU-bound; let other tasks run between
            // windows of a large object.
            tokio::task::yield_now().await;
        }
        let tail = plan.pipeline.finish()?;
        if !tail.is_empty() {
            writer.write_all(&tail).await?;
        }
        writer.shutdown().await?;
        Ok(())
    }

    async fn transfer_partitioned(&self, rule: &Rule, object: &ObjectInfo) -> Result<Vec<String>> {
        let tmpl = rule.destination_template.as_ref().ok_or_else(|| {
            MirrorError::config(format!(
                "rule '{}' splits without a destination_template",
                rule.id()
            ))
        })?;
        let policy = rule
            .split_policy()
            .ok_or_else(|| MirrorError::config(format!("rule '{}' has no split policy", rule.id())))?;

        let mut decode = codec::decode_pipeline(&object.name);
        let mut partitioner = Partitioner::new(policy);
        let mut reader = self.inner.storage.reader(&object.url).await?;

        let mut in_flight: FuturesUnordered<JoinHandle<Result<String>>> = FuturesUnordered::new();
        let mut urls = Vec::new();
        let mut index = 0usize;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let decoded = decode.transform(&buf[..n])?;
            for part in partitioner.push(&decoded) {
                self.enqueue_part(rule, object, tmpl, index, part, &mut in_flight, &mut urls)
                    .await?;
                index += 1;
            }
        }
        let tail = decode.finish()?;
        let mut parts = partitioner.push(&tail);
        parts.extend(partitioner.finish());
        for part in parts {
            self.enqueue_part(rule, object, tmpl, index, part, &mut in_flight, &mut urls)
                .await?;
            index += 1;
        }
        while let Some(joined) = in_flight.next().await {
            urls.push(flatten_part_result(joined)?);
        }
        debug!(url = %object.url, parts = urls.len(), "partitioned transfer complete");
        Ok(urls)
    }

    /// Spawn one part upload, first draining a slot when the fan-out bound
    /// is reached
    async fn enqueue_part(
        &self,
        rule: &Rule,
        object: &ObjectInfo,
        tmpl: &str,
        index: usize,
        part: Vec<u8>,
        in_flight: &mut FuturesUnordered<JoinHandle<Result<String>>>,
        urls: &mut Vec<String>,
    ) -> Result<()> {
        while in_flight.len() >= rule.part_fan_out {
            if let Some(joined) = in_flight.next().await {
                urls.push(flatten_part_result(joined)?);
            }
        }
        let storage = self.inner.storage.clone();
        let rule = rule.clone();
        let tmpl = tmpl.to_string();
        let object_name = object.name.clone();
        in_flight.push(tokio::spawn(async move {
            let dest = template::expand(&tmpl, &object_name, Some(index))?;
            let mut pipeline = codec::part_pipeline(&rule);
            let mut data = pipeline.transform(&part)?;
            data.extend(pipeline.finish()?);
            storage.upload(&dest, data).await?;
            Ok(dest)
        }));
        Ok(())
    }

    async fn publish(
        &self,
        rule: &Rule,
        object: &ObjectInfo,
        request: &Request,
        response: &SharedResponse,
    ) -> Result<()> {
        let Some(target) = &rule.notification else {
            return Ok(());
        };
        let body = json!({
            "url": object.url,
            "size": object.size,
            "mtime": object.modified.to_rfc3339(),
            "rule_id": rule.id(),
        });
        let message_id = self
            .inner
            .notifier
            .publish(target, body, &request.attributes)
            .await
            .map_err(|err| MirrorError::notification(&target.target, err.to_string()))?;
        response.add_message_id(&message_id);
        response.add_invoked(&object.url, &message_id);
        Ok(())
    }

    async fn run_actions(
        &self,
        actions: &[Action],
        object: &ObjectInfo,
        error: Option<&str>,
        response: &SharedResponse,
    ) -> Result<()> {
        for action in actions {
            match action.action {
                ActionKind::Delete => {
                    debug!(url = %object.url, "deleting source after mirror");
                    self.inner.storage.delete(&object.url).await?;
                }
                ActionKind::Move => {
                    let target = action.url.as_deref().ok_or_else(|| {
                        MirrorError::config("move action is missing its target url")
                    })?;
                    let dest = url::join(target, &object.name);
                    self.copy_object(&object.url, &dest).await?;
                    self.inner.storage.delete(&object.url).await?;
                    response.add_moved(&object.url, &dest);
                    if let Some(message) = error {
                        let error_url = url::join(
                            target,
                            &format!("{}-error.txt", url::file_stem(&object.name)),
                        );
                        self.inner
                            .storage
                            .upload(&error_url, message.as_bytes().to_vec())
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn copy_object(&self, source: &str, dest: &str) -> Result<()> {
        let storage = &self.inner.storage;
        if storage.same_backend(source, dest) {
            return storage.copy(source, dest).await;
        }
        let data = storage.download(source).await?;
        storage.upload(dest, data).await
    }
}

fn flatten_part_result(joined: std::result::Result<Result<String>, tokio::task::JoinError>) -> Result<String> {
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(MirrorError::codec(format!(
            "part upload task failed: {}",
            join_err
        ))),
    }
}

/// Schema violations raised inside codec stages carry no URL; attach the
/// source before they land on the response.
fn contextualize(err: MirrorError, source_url: &str) -> MirrorError {
    match err {
        MirrorError::Schema { url, reason } if url.is_empty() => {
            MirrorError::schema(source_url, reason)
        }
        other => other,
    }
}

fn record_failure(response: &SharedResponse, source_url: &str, err: MirrorError) {
    let err = contextualize(err, source_url);
    if err.is_schema() {
        response.set_schema_error(&err.to_string());
    } else {
        response.set_error(&err.to_string());
    }
}

fn record_rule_failure(
    response: &SharedResponse,
    rule_id: &str,
    source_url: &str,
    err: MirrorError,
) {
    let err = contextualize(err, source_url);
    if err.is_schema() {
        response.set_schema_error(&err.to_string());
    } else {
        response.set_error(&format!("rule '{}': {}", rule_id, err));
    }
}
