//! Project maintenance: stray connectors and annotations nobody uses.

use crate::domain::model::{ConnectorId, SkeletonId};
use crate::domain::ports::{CatmaidApi, Confirm};
use crate::utils::error::{AddonsError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

/// Connectors not linked to any skeleton.
pub async fn find_unlinked_connectors<A: CatmaidApi + ?Sized>(api: &A) -> Result<Vec<ConnectorId>> {
    Ok(api
        .connectors()
        .await?
        .into_iter()
        .filter(|c| !c.linked)
        .map(|c| c.id)
        .collect())
}

pub async fn delete_unlinked_connectors<A, C>(api: &A, confirm: &C) -> Result<Vec<ConnectorId>>
where
    A: CatmaidApi + ?Sized,
    C: Confirm + ?Sized,
{
    api.clear_cache();
    let unlinked = find_unlinked_connectors(api).await?;
    if unlinked.is_empty() {
        tracing::info!("✅ No unlinked connectors in project {}", api.project_id());
        return Ok(unlinked);
    }

    let question = format!("Found {} unlinked connectors. Continue?", unlinked.len());
    if !confirm.confirm(&question) {
        return Err(AddonsError::Cancelled { message: question });
    }

    let bar = ProgressBar::new(unlinked.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} connectors deleted") {
        bar.set_style(style);
    }
    for &connector in &unlinked {
        api.delete_connector(connector).await?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    tracing::info!("🗑️ Deleted {} unlinked connectors", unlinked.len());
    Ok(unlinked)
}

/// Groups of two or more connectors sharing exact coordinates.
pub async fn find_overlapping_connectors<A: CatmaidApi + ?Sized>(
    api: &A,
) -> Result<Vec<Vec<ConnectorId>>> {
    let mut by_position: BTreeMap<[u64; 3], Vec<ConnectorId>> = BTreeMap::new();
    for c in api.connectors().await? {
        // + 0.0 folds -0.0 into 0.0
        let key = [(c.x + 0.0).to_bits(), (c.y + 0.0).to_bits(), (c.z + 0.0).to_bits()];
        by_position.entry(key).or_default().push(c.id);
    }
    Ok(by_position
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort_unstable();
            ids
        })
        .collect())
}

/// Delete annotations nothing is annotated with, counting meta-annotation
/// and volume uses as well as neurons. The server only deletes an
/// annotation when its last use is removed, so each one is attached to and
/// then removed from `dummy_skeleton`.
pub async fn purge_unused_annotations<A, C>(
    api: &A,
    dummy_skeleton: Option<SkeletonId>,
    confirm: &C,
    force: bool,
) -> Result<Vec<String>>
where
    A: CatmaidApi + ?Sized,
    C: Confirm + ?Sized,
{
    let dummy = dummy_skeleton.ok_or_else(|| {
        AddonsError::config(format!(
            "No dummy skeleton configured for project {}; add it to purge_dummy_skeletons",
            api.project_id()
        ))
    })?;

    api.clear_cache();
    let mut unused = Vec::new();
    for annotation in api.annotation_list().await? {
        if api.annotated_entity_count(&annotation.name).await? == 0 {
            unused.push(annotation.name);
        }
    }
    if unused.is_empty() {
        tracing::info!("✅ No unused annotations in project {}", api.project_id());
        return Ok(unused);
    }

    let mut purged = Vec::new();
    for name in unused {
        if !force && !confirm.confirm(&format!("Purge annotation \"{}\"?", name)) {
            continue;
        }
        let names = std::slice::from_ref(&name);
        api.add_annotations(&[dummy], names).await?;
        api.remove_annotations(&[dummy], names).await?;
        tracing::debug!("Purged \"{}\"", name);
        purged.push(name);
    }
    tracing::info!("🗑️ Purged {} unused annotations", purged.len());
    Ok(purged)
}
