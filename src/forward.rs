use crate::{
    controller::{SyncController, TimerAction, ASSET_POLL_MS},
    images,
    path_map::KnownMeta,
    protocol::{CanvasSyncChange, ClientMessage, SyncAction, SyncShapeType},
    shape::{basename, name_to_txt, parent_dir, path_to_name, ShapeId, ShapeType},
    store::{Source, SourcedDelta},
};
use tracing::{debug, info, warn};

/// Strips characters that would change the meaning of a path out of a display name.
fn sanitize_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' { '-' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        fallback.to_string()
    } else {
        cleaned
    }
}

impl SyncController {
    /// Translates one user-originated store delta into filesystem operations. Remote-sourced
    /// deltas (our own applies) are filtered out here, which is half of the loop-suppression
    /// discipline.
    #[tracing::instrument(skip_all)]
    pub fn handle_store_delta(&mut self, delta: SourcedDelta) {
        if self.is_disposed() || delta.source != Source::User {
            return;
        }
        let delta = delta.delta;
        let mut changes: Vec<CanvasSyncChange> = Vec::new();
        let mut annotation_relevant = false;

        for shape in &delta.added {
            match shape.ty {
                ShapeType::NamedText => self.forward_text_added(shape, &mut changes),
                ShapeType::Frame => self.forward_frame_added(shape, &mut changes),
                ShapeType::Image => {
                    annotation_relevant = true;
                    self.forward_image_added(shape);
                }
                ShapeType::Draw => annotation_relevant = true,
                // Arrows and anything else don't participate in sync
                _ => {}
            }
        }

        for (old, new) in &delta.updated {
            if self.pending_deletes.contains(&new.id) {
                continue;
            }
            match new.ty {
                ShapeType::NamedText => {
                    self.forward_mapped_updated(old, new, &mut changes, true)
                }
                ShapeType::Image => {
                    annotation_relevant = true;
                    self.forward_mapped_updated(old, new, &mut changes, false)
                }
                ShapeType::Frame => self.forward_frame_updated(old, new, &mut changes),
                ShapeType::Draw => annotation_relevant = true,
                _ => {}
            }
        }

        for shape in &delta.removed {
            match shape.ty {
                ShapeType::NamedText => self.forward_removed(shape, SyncShapeType::Text, &mut changes),
                ShapeType::Image => {
                    annotation_relevant = true;
                    self.forward_removed(shape, SyncShapeType::Image, &mut changes);
                }
                ShapeType::Frame => self.forward_frame_removed(shape, &mut changes),
                ShapeType::Draw => annotation_relevant = true,
                _ => {}
            }
        }

        // Upload-originated images: the asset store binding a src is our registration moment
        for (old, new) in &delta.asset_updates {
            if old.src.is_none() {
                if let Some(src) = &new.src {
                    let holder: Option<ShapeId> = {
                        let store = self.store.lock();
                        let found = store
                            .shapes_of_type(&ShapeType::Image)
                            .find(|s| s.props.asset_id.as_ref() == Some(&new.id))
                            .map(|s| s.id.clone());
                        found
                    };
                    if let Some(shape) = holder {
                        images::register_uploaded_image(self, shape, src);
                    }
                }
            }
        }

        if !changes.is_empty() {
            debug!("emitting {} sync changes", changes.len());
            let _ = self
                .outbound
                .send(ClientMessage::CanvasSync { changes });
        }
        if annotation_relevant {
            self.schedule_annotation_scan();
        }
        self.schedule_snapshot();
    }

    fn forward_text_added(
        &mut self,
        shape: &crate::shape::ShapeRecord,
        changes: &mut Vec<CanvasSyncChange>,
    ) {
        let name = sanitize_name(shape.props.name.as_deref().unwrap_or(""), "untitled");
        let parent_path = shape
            .parent_id
            .as_ref()
            .and_then(|p| self.map.path_for(p))
            .map(|p| p.to_string());
        let desired = name_to_txt(&name, parent_path.as_deref());
        let path = self.map.ensure_unique_path(&desired, None);
        // The editor must mirror the name the file actually got
        let final_name = path_to_name(&path).to_string();
        if final_name != name || shape.props.name.as_deref() != Some(final_name.as_str()) {
            let mut store = self.store.lock();
            store.transact(Source::Remote, |txn| {
                txn.update_shape(&shape.id, |s| s.props.name = Some(final_name.clone()));
            });
        }
        let content = shape.props.text.clone().unwrap_or_default();
        if let Err(err) = self.map.assign(shape.id.clone(), path.clone()) {
            warn!("couldn't map new text shape: {err}");
            return;
        }
        self.map.record_known(
            path.clone(),
            KnownMeta {
                content: Some(content.clone()),
                ..KnownMeta::default()
            },
        );
        info!("text shape {} -> create '{path}'", shape.id);
        changes.push(CanvasSyncChange {
            action: SyncAction::Create,
            shape_type: SyncShapeType::Text,
            path,
            old_path: None,
            content: Some(content),
        });
    }

    fn forward_frame_added(
        &mut self,
        shape: &crate::shape::ShapeRecord,
        changes: &mut Vec<CanvasSyncChange>,
    ) {
        let desired = sanitize_name(shape.props.name.as_deref().unwrap_or(""), "frame");
        let path = self.map.ensure_unique_path(&desired, None);
        if shape.props.name.as_deref() != Some(path.as_str()) {
            let mut store = self.store.lock();
            store.transact(Source::Remote, |txn| {
                txn.update_shape(&shape.id, |s| s.props.name = Some(path.clone()));
            });
        }
        if let Err(err) = self.map.assign(shape.id.clone(), path.clone()) {
            warn!("couldn't map new frame: {err}");
            return;
        }
        self.map.record_known(
            path.clone(),
            KnownMeta {
                is_directory: true,
                ..KnownMeta::default()
            },
        );
        info!("frame {} -> mkdir '{path}'", shape.id);
        changes.push(CanvasSyncChange {
            action: SyncAction::Create,
            shape_type: SyncShapeType::Frame,
            path,
            old_path: None,
            content: None,
        });
    }

    /// A user-added image emits nothing: the asset bytes were already uploaded through the
    /// asset endpoint, and the mapping registers when the asset's src binds.
    fn forward_image_added(&mut self, shape: &crate::shape::ShapeRecord) {
        let Some(asset_id) = shape.props.asset_id.clone() else {
            return;
        };
        let src = {
            let store = self.store.lock();
            store.asset(&asset_id).and_then(|a| a.src.clone())
        };
        match src {
            Some(src) => images::register_uploaded_image(self, shape.id.clone(), &src),
            None => self.schedule(
                ASSET_POLL_MS,
                TimerAction::AssetSrcPoll {
                    asset: asset_id,
                    shape: shape.id.clone(),
                    attempt: 0,
                },
            ),
        }
    }

    /// Updates to mapped text/image shapes: reparent becomes a move, rename a rename, text edits
    /// an update. `text_shape` gates the text-specific rows of the table.
    fn forward_mapped_updated(
        &mut self,
        old: &crate::shape::ShapeRecord,
        new: &crate::shape::ShapeRecord,
        changes: &mut Vec<CanvasSyncChange>,
        text_shape: bool,
    ) {
        let Some(old_path) = self.map.path_for(&new.id).map(|p| p.to_string()) else {
            // Unmapped shapes (e.g. an image whose src never bound) have nothing to sync
            return;
        };
        let shape_type = if text_shape {
            SyncShapeType::Text
        } else {
            SyncShapeType::Image
        };

        if old.parent_id != new.parent_id {
            let parent_path = new
                .parent_id
                .as_ref()
                .and_then(|p| self.map.path_for(p))
                .map(|p| p.to_string());
            let desired = match &parent_path {
                Some(dir) => format!("{dir}/{}", basename(&old_path)),
                None => basename(&old_path).to_string(),
            };
            let path = self.map.ensure_unique_path(&desired, Some(&old_path));
            if path == old_path {
                return;
            }
            info!("shape {} reparented, move '{old_path}' -> '{path}'", new.id);
            self.map.rename(&old_path, path.clone());
            self.map.rename_known(&old_path, path.clone());
            changes.push(CanvasSyncChange {
                action: SyncAction::Move,
                shape_type,
                path,
                old_path: Some(old_path.clone()),
                content: None,
            });
            // A moved image leaves its export behind; the scan re-derives it at the new spot
            if !text_shape {
                if let Some(change) = self.retire_annotation(&old_path) {
                    changes.push(change);
                }
            }
            return;
        }

        if text_shape && old.props.name != new.props.name {
            let name = sanitize_name(new.props.name.as_deref().unwrap_or(""), "untitled");
            let desired = name_to_txt(&name, parent_dir(&old_path));
            let path = self.map.ensure_unique_path(&desired, Some(&old_path));
            if path != old_path {
                info!("shape {} renamed, '{old_path}' -> '{path}'", new.id);
                self.map.rename(&old_path, path.clone());
                self.map.rename_known(&old_path, path.clone());
                changes.push(CanvasSyncChange {
                    action: SyncAction::Rename,
                    shape_type,
                    path: path.clone(),
                    old_path: Some(old_path),
                    content: None,
                });
            }
            // Dedupe may have shifted the final name out from under the user
            let final_name = path_to_name(&path).to_string();
            if new.props.name.as_deref() != Some(final_name.as_str()) {
                let id = new.id.clone();
                let mut store = self.store.lock();
                store.transact(Source::Remote, |txn| {
                    txn.update_shape(&id, |s| s.props.name = Some(final_name.clone()));
                });
            }
            return;
        }

        if text_shape && old.props.text != new.props.text {
            let content = new.props.text.clone().unwrap_or_default();
            if let Some(meta) = self.map.known_meta(&old_path) {
                let mut meta = meta.clone();
                meta.content = Some(content.clone());
                self.map.record_known(old_path.clone(), meta);
            }
            changes.push(CanvasSyncChange {
                action: SyncAction::Update,
                shape_type,
                path: old_path,
                old_path: None,
                content: Some(content),
            });
        }
    }

    /// A frame rename renames the directory and cascades through every child mapping.
    fn forward_frame_updated(
        &mut self,
        old: &crate::shape::ShapeRecord,
        new: &crate::shape::ShapeRecord,
        changes: &mut Vec<CanvasSyncChange>,
    ) {
        if old.props.name == new.props.name {
            return;
        }
        let Some(old_path) = self.map.path_for(&new.id).map(|p| p.to_string()) else {
            return;
        };
        let desired = sanitize_name(new.props.name.as_deref().unwrap_or(""), "frame");
        let path = self.map.ensure_unique_path(&desired, Some(&old_path));
        if path != old_path {
            info!("frame {} renamed, '{old_path}' -> '{path}'", new.id);
            self.map.rename(&old_path, path.clone());
            // Cascades the children and carries the known entries, the directory included
            self.map.frame_renamed(&old_path, &path);
            // The directory rename carried any export files along, so their bookkeeping moves
            // rather than retiring
            let old_dir = format!("{old_path}/");
            let carried: Vec<String> = self
                .annotated
                .iter()
                .filter(|p| p.starts_with(&old_dir))
                .cloned()
                .collect();
            for old in carried {
                self.annotated.remove(&old);
                self.annotated
                    .insert(format!("{path}/{}", &old[old_dir.len()..]));
            }
            changes.push(CanvasSyncChange {
                action: SyncAction::Rename,
                shape_type: SyncShapeType::Frame,
                path: path.clone(),
                old_path: Some(old_path),
                content: None,
            });
        }
        if new.props.name.as_deref() != Some(path.as_str()) {
            let id = new.id.clone();
            let mut store = self.store.lock();
            store.transact(Source::Remote, |txn| {
                txn.update_shape(&id, |s| s.props.name = Some(path.clone()));
            });
        }
    }

    fn forward_removed(
        &mut self,
        shape: &crate::shape::ShapeRecord,
        shape_type: SyncShapeType,
        changes: &mut Vec<CanvasSyncChange>,
    ) {
        let Some(path) = self.map.path_for(&shape.id).map(|p| p.to_string()) else {
            return;
        };
        info!("shape {} removed, delete '{path}'", shape.id);
        self.map.forget(&shape.id);
        self.map.forget_known(&path);
        changes.push(CanvasSyncChange {
            action: SyncAction::Delete,
            shape_type,
            path: path.clone(),
            old_path: None,
            content: None,
        });
        if shape_type == SyncShapeType::Image {
            if let Some(change) = self.retire_annotation(&path) {
                changes.push(change);
            }
        }
    }

    /// Frame removal: the editor removed the children itself and fired their own removes; any
    /// leftover child mappings are cascade-forgotten.
    fn forward_frame_removed(
        &mut self,
        shape: &crate::shape::ShapeRecord,
        changes: &mut Vec<CanvasSyncChange>,
    ) {
        let Some(path) = self.map.path_for(&shape.id).map(|p| p.to_string()) else {
            return;
        };
        info!("frame {} removed, delete '{path}'", shape.id);
        self.map.forget(&shape.id);
        let prefix = format!("{path}/");
        let leftovers: Vec<ShapeId> = self
            .map
            .iter()
            .filter(|(_, p)| p.starts_with(&prefix))
            .map(|(s, _)| s.clone())
            .collect();
        for orphan in leftovers {
            self.map.forget(&orphan);
        }
        let known_under: Vec<String> = self
            .map
            .known_paths()
            .filter(|p| *p == path || p.starts_with(&prefix))
            .map(|p| p.to_string())
            .collect();
        for p in known_under {
            self.map.forget_known(&p);
        }
        changes.push(CanvasSyncChange {
            action: SyncAction::Delete,
            shape_type: SyncShapeType::Frame,
            path,
            old_path: None,
            content: None,
        });
    }
}
