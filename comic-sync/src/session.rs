//! Session driver.
//!
//! One task owns the [`PageCollection`] and the [`SyncEngine`]; everything
//! else talks to it through a [`SessionHandle`]. Network calls and raster
//! work run in spawned tasks and report back over an internal channel, so
//! the owning task never blocks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use comic_core::{
    signature_of, ImageLibrary, LayoutResolver, LibraryPartition, Mutation, OffscreenGeometry,
    PageCollection, PageRecord, PanelGeometryProvider, Placement, Rgba, SlotId, TransformState,
};
use comic_renderer::silhouette::tint;
use comic_renderer::{
    compose_pages, decode_all, CompositorConfig, ExportConfig, ExportFormat, ImageCache,
    ImageCacheConfig, OverlayStore, PageExporter, Pixmap, RenderError, SilhouetteCache,
};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::engine::{PersistToken, RemoteState, SaveState, SaveStatus, SyncEffect, SyncEngine};
use crate::error::{RemoteResult, SessionError, SessionResult};
use crate::push::{ChannelController, PushChannel, PushSource};
use crate::remote::{unix_millis, HttpRemote, ImageUpload, LoadedState, RemoteStore, StateArchive};

const COMMAND_BUFFER: usize = 64;

/// An exported file: name and bytes.
pub type ExportedFile = (String, Vec<u8>);

/// A page edit routed through the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Append a page, optionally seeded.
    AddPage(Option<PageRecord>),
    /// Remove the page at this index.
    DeletePage(usize),
    /// Switch a page to another template.
    ChangeLayout {
        /// Page index.
        index: usize,
        /// Template name.
        layout: String,
    },
    /// Put an image into a slot.
    Assign {
        /// Page index.
        index: usize,
        /// Slot id.
        slot: SlotId,
        /// Image name.
        image: String,
    },
    /// Empty a slot.
    ClearSlot {
        /// Page index.
        index: usize,
        /// Slot id.
        slot: SlotId,
    },
    /// Commit a pan/zoom state immediately.
    SetTransform {
        /// Page index.
        index: usize,
        /// Slot id.
        slot: SlotId,
        /// New state.
        transform: TransformState,
    },
    /// Change a page's gutter color.
    SetGutterColor {
        /// Page index.
        index: usize,
        /// CSS color.
        color: String,
    },
    /// Flip a page's lock.
    ToggleLock(usize),
    /// Set a page's lock.
    SetLocked {
        /// Page index.
        index: usize,
        /// Lock value.
        locked: bool,
    },
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Pages in order.
    pub pages: Vec<PageRecord>,
    /// Every image in the library.
    pub images: Vec<String>,
    /// Library split by assignment.
    pub partition: LibraryPartition,
    /// Selected image, if any.
    pub selection: Option<String>,
    /// Save pipeline state.
    pub save_state: SaveState,
    /// Remote application state.
    pub remote_state: RemoteState,
    /// Signature of the last state the server acknowledged or pushed.
    pub last_acknowledged: Option<String>,
}

enum Command {
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Edit(Edit, oneshot::Sender<SessionResult<Mutation>>),
    StageTransform {
        index: usize,
        slot: SlotId,
        transform: TransformState,
    },
    SelectImage(String, oneshot::Sender<SessionResult<()>>),
    ClearSelection,
    PlaceSelected {
        index: usize,
        slot: SlotId,
        reply: oneshot::Sender<SessionResult<Placement>>,
    },
    Upload(Vec<ImageUpload>, oneshot::Sender<SessionResult<Vec<String>>>),
    DeleteImage(String, oneshot::Sender<SessionResult<Mutation>>),
    Reset(oneshot::Sender<SessionResult<SessionSnapshot>>),
    Import(StateArchive, oneshot::Sender<SessionResult<SessionSnapshot>>),
    ExportState(oneshot::Sender<SessionResult<StateArchive>>),
    ExportPages(ExportFormat, oneshot::Sender<SessionResult<Vec<ExportedFile>>>),
    RebuildOverlays(oneshot::Sender<SessionResult<Vec<String>>>),
    Flush(oneshot::Sender<SessionResult<()>>),
    SetVisible(bool),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    Persisted {
        token: PersistToken,
        signature: String,
        result: Result<(), String>,
    },
    Uploaded {
        result: RemoteResult<Vec<String>>,
        reply: oneshot::Sender<SessionResult<Vec<String>>>,
    },
    ImageDeleted {
        name: String,
        result: RemoteResult<()>,
        reply: oneshot::Sender<SessionResult<Mutation>>,
    },
    Loaded {
        result: RemoteResult<LoadedState>,
        reply: oneshot::Sender<SessionResult<SessionSnapshot>>,
    },
}

enum LoadKind {
    Reset,
    Import(StateArchive),
}

struct RenderContext {
    resolver: Arc<LayoutResolver>,
    provider: Arc<dyn PanelGeometryProvider>,
    images: Mutex<ImageCache>,
    silhouettes: SilhouetteCache,
    compositor: CompositorConfig,
    exporter: PageExporter,
}

/// Configures and starts a session.
pub struct SessionBuilder {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    push: Option<Arc<dyn PushSource>>,
    overlay_store: Option<Arc<dyn OverlayStore>>,
    resolver: Option<Arc<LayoutResolver>>,
    provider: Option<Arc<dyn PanelGeometryProvider>>,
    compositor: CompositorConfig,
    export: ExportConfig,
    cache: ImageCacheConfig,
    images: Vec<String>,
    default_layout: Option<String>,
    visible: bool,
}

impl SessionBuilder {
    /// Session backed by `remote`, without a push channel or overlay store.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            config: SyncConfig::default(),
            remote,
            push: None,
            overlay_store: None,
            resolver: None,
            provider: None,
            compositor: CompositorConfig::default(),
            export: ExportConfig::default(),
            cache: ImageCacheConfig::default(),
            images: Vec::new(),
            default_layout: None,
            visible: true,
        }
    }

    /// Session using one HTTP client for saves, pushes and overlays.
    #[must_use]
    pub fn http(remote: HttpRemote) -> Self {
        let remote = Arc::new(remote);
        let push: Arc<dyn PushSource> = Arc::clone(&remote) as Arc<dyn PushSource>;
        let overlays: Arc<dyn OverlayStore> = Arc::clone(&remote) as Arc<dyn OverlayStore>;
        Self {
            push: Some(push),
            overlay_store: Some(overlays),
            ..Self::new(remote)
        }
    }

    /// Use these timings.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to pushes from `source`.
    #[must_use]
    pub fn with_push_source(mut self, source: Arc<dyn PushSource>) -> Self {
        self.push = Some(source);
        self
    }

    /// Load and store silhouettes through `store`.
    #[must_use]
    pub fn with_overlay_store(mut self, store: Arc<dyn OverlayStore>) -> Self {
        self.overlay_store = Some(store);
        self
    }

    /// Resolve templates with `resolver` instead of the built-in set.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<LayoutResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Measure panels with `provider` instead of the offscreen layout.
    #[must_use]
    pub fn with_geometry(mut self, provider: Arc<dyn PanelGeometryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Compositor options for exports.
    #[must_use]
    pub fn with_compositor(mut self, config: CompositorConfig) -> Self {
        self.compositor = config;
        self
    }

    /// Encoder options for exports.
    #[must_use]
    pub fn with_export(mut self, config: ExportConfig) -> Self {
        self.export = config;
        self
    }

    /// Decoded image cache limits.
    #[must_use]
    pub fn with_image_cache(mut self, config: ImageCacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Images already known to the server.
    #[must_use]
    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = images.into_iter().map(Into::into).collect();
        self
    }

    /// Template for new pages. Defaults to the first registered template.
    #[must_use]
    pub fn with_default_layout(mut self, layout: impl Into<String>) -> Self {
        self.default_layout = Some(layout.into());
        self
    }

    /// Start with the view hidden; the push channel stays down until
    /// [`SessionHandle::set_visible`] reports it visible.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Load the saved pages and start the session task.
    ///
    /// A failed load is logged and the session starts with one empty page.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Layout`] if no template is registered.
    #[instrument(skip_all, fields(server = %self.config.server_url))]
    pub async fn start(self) -> SessionResult<SessionHandle> {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(LayoutResolver::builtin()));
        let default_layout = match self.default_layout {
            Some(layout) => layout,
            None => resolver
                .registry()
                .default_name()
                .map(str::to_string)
                .ok_or_else(|| {
                    comic_core::LayoutError::UnknownTemplate("<default>".to_string())
                })?,
        };
        resolver.resolve(&default_layout)?;

        let mut collection = PageCollection::new(default_layout)
            .with_library(ImageLibrary::with_images(self.images));
        let mut engine = SyncEngine::from_config(&self.config);

        let _ = engine.begin_remote_apply();
        match self.remote.fetch_pages().await {
            Ok(pages) => {
                let signature = signature_of(&pages).ok();
                info!(pages = pages.len(), "Loaded saved pages");
                collection.rebuild(pages);
                engine.rebuild_finished(signature);
            }
            Err(err) => {
                warn!(error = %err, "Failed to load saved pages, starting with an empty page");
                collection.rebuild(Vec::new());
                engine.rebuild_finished(None);
            }
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);

        let config = self.config;
        let visible = self.visible;
        let push_channel = self.push.map(|source| {
            let mut controller = ChannelController::from_config(&config);
            let _ = controller.set_visible(visible);
            PushChannel::spawn(source, controller, push_tx)
        });

        let render = Arc::new(RenderContext {
            resolver,
            provider: self
                .provider
                .unwrap_or_else(|| Arc::new(OffscreenGeometry::new())),
            images: Mutex::new(ImageCache::with_config(self.cache)),
            silhouettes: SilhouetteCache::new(),
            compositor: self.compositor,
            exporter: PageExporter::new(self.export),
        });

        let actor = SessionActor {
            collection,
            engine,
            remote: self.remote,
            overlay_store: self.overlay_store,
            render,
            frame_interval: config.frame_interval,
            status: status_tx,
            internal: internal_tx,
            push_channel,
            save_at: None,
            deferred_push: None,
            staged: BTreeMap::new(),
            flush_waiters: Vec::new(),
            export_jobs: Vec::new(),
            shutdown: None,
        };
        tokio::spawn(actor.run(commands_rx, internal_rx, push_rx));

        Ok(SessionHandle {
            commands: commands_tx,
            status: status_rx,
        })
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SaveStatus>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn notify(&self, command: Command) -> SessionResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session stopped.
    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Apply a page edit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while remote state is being applied,
    /// or the collection error for an invalid edit.
    pub async fn edit(&self, edit: Edit) -> SessionResult<Mutation> {
        self.request(|reply| Command::Edit(edit, reply)).await?
    }

    /// Append a page.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn add_page(&self, seed: Option<PageRecord>) -> SessionResult<Mutation> {
        self.edit(Edit::AddPage(seed)).await
    }

    /// Remove a page.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn delete_page(&self, index: usize) -> SessionResult<Mutation> {
        self.edit(Edit::DeletePage(index)).await
    }

    /// Switch a page's template.
    ///
    /// # Errors
    ///
    /// Also fails with [`SessionError::Layout`] for an unknown template.
    pub async fn change_layout(
        &self,
        index: usize,
        layout: impl Into<String>,
    ) -> SessionResult<Mutation> {
        self.edit(Edit::ChangeLayout {
            index,
            layout: layout.into(),
        })
        .await
    }

    /// Put `image` into `slot`.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn assign(
        &self,
        index: usize,
        slot: impl Into<SlotId>,
        image: impl Into<String>,
    ) -> SessionResult<Mutation> {
        self.edit(Edit::Assign {
            index,
            slot: slot.into(),
            image: image.into(),
        })
        .await
    }

    /// Empty a slot.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn clear_slot(&self, index: usize, slot: impl Into<SlotId>) -> SessionResult<Mutation> {
        self.edit(Edit::ClearSlot {
            index,
            slot: slot.into(),
        })
        .await
    }

    /// Commit a transform now.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn set_transform(
        &self,
        index: usize,
        slot: impl Into<SlotId>,
        transform: TransformState,
    ) -> SessionResult<Mutation> {
        self.edit(Edit::SetTransform {
            index,
            slot: slot.into(),
            transform,
        })
        .await
    }

    /// Stage a transform during a gesture. Staged transforms are committed
    /// once per frame; only the latest per slot survives.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session stopped.
    pub async fn stage_transform(
        &self,
        index: usize,
        slot: impl Into<SlotId>,
        transform: TransformState,
    ) -> SessionResult<()> {
        self.notify(Command::StageTransform {
            index,
            slot: slot.into(),
            transform,
        })
        .await
    }

    /// Change a page's gutter color.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn set_gutter_color(
        &self,
        index: usize,
        color: impl Into<String>,
    ) -> SessionResult<Mutation> {
        self.edit(Edit::SetGutterColor {
            index,
            color: color.into(),
        })
        .await
    }

    /// Flip a page's lock.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn toggle_lock(&self, index: usize) -> SessionResult<Mutation> {
        self.edit(Edit::ToggleLock(index)).await
    }

    /// Set a page's lock.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn set_locked(&self, index: usize, locked: bool) -> SessionResult<Mutation> {
        self.edit(Edit::SetLocked { index, locked }).await
    }

    /// Select an unassigned image for placement.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Library`] for unknown or assigned images.
    pub async fn select_image(&self, name: impl Into<String>) -> SessionResult<()> {
        let name = name.into();
        self.request(|reply| Command::SelectImage(name, reply))
            .await?
    }

    /// Drop the selection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session stopped.
    pub async fn clear_selection(&self) -> SessionResult<()> {
        self.notify(Command::ClearSelection).await
    }

    /// Place the selected image into `slot` of page `index`.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::edit`].
    pub async fn place_selected(
        &self,
        index: usize,
        slot: impl Into<SlotId>,
    ) -> SessionResult<Placement> {
        let slot = slot.into();
        self.request(|reply| Command::PlaceSelected { index, slot, reply })
            .await?
    }

    /// Upload images and add the stored names to the library.
    ///
    /// Every file is validated before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Library`] for a rejected file, or the remote
    /// error if the upload fails.
    pub async fn upload_images(&self, uploads: Vec<ImageUpload>) -> SessionResult<Vec<String>> {
        self.request(|reply| Command::Upload(uploads, reply)).await?
    }

    /// Delete an image on the server, then from the library and every page.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the server refuses; local state is kept.
    pub async fn delete_image(&self, name: impl Into<String>) -> SessionResult<Mutation> {
        let name = name.into();
        self.request(|reply| Command::DeleteImage(name, reply))
            .await?
    }

    /// Reset the server state and rebuild from its answer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] if a remote apply is already running.
    pub async fn reset_state(&self) -> SessionResult<SessionSnapshot> {
        self.request(Command::Reset).await?
    }

    /// Import a state archive and rebuild from the server's answer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] if a remote apply is already running.
    pub async fn import_state(&self, archive: StateArchive) -> SessionResult<SessionSnapshot> {
        self.request(|reply| Command::Import(archive, reply)).await?
    }

    /// Download the server's state archive.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn export_state(&self) -> SessionResult<StateArchive> {
        self.request(Command::ExportState).await?
    }

    /// Render every page and encode it. Pending saves are flushed and
    /// acknowledged first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Render`] if a page cannot be rendered.
    pub async fn export_pages(&self, format: ExportFormat) -> SessionResult<Vec<ExportedFile>> {
        self.request(|reply| Command::ExportPages(format, reply))
            .await?
    }

    /// Regenerate every template silhouette and store them.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Render`] if no overlay store is configured
    /// or a silhouette cannot be produced.
    pub async fn rebuild_overlays(&self) -> SessionResult<Vec<String>> {
        self.request(Command::RebuildOverlays).await?
    }

    /// Persist any pending edit now and wait until every save is
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SaveFailed`] if the last save failed.
    pub async fn flush(&self) -> SessionResult<()> {
        self.request(Command::Flush).await?
    }

    /// Report view visibility to the push channel.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session stopped.
    pub async fn set_visible(&self, visible: bool) -> SessionResult<()> {
        self.notify(Command::SetVisible(visible)).await
    }

    /// Current save status.
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    /// Save status updates as a stream.
    #[must_use]
    pub fn status_stream(&self) -> WatchStream<SaveStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Flush pending edits and stop the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session already stopped.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.request(Command::Shutdown).await
    }
}

struct SessionActor {
    collection: PageCollection,
    engine: SyncEngine,
    remote: Arc<dyn RemoteStore>,
    overlay_store: Option<Arc<dyn OverlayStore>>,
    render: Arc<RenderContext>,
    frame_interval: Duration,
    status: watch::Sender<SaveStatus>,
    internal: mpsc::UnboundedSender<Internal>,
    push_channel: Option<PushChannel>,
    save_at: Option<Instant>,
    deferred_push: Option<(Instant, Vec<PageRecord>)>,
    staged: BTreeMap<(usize, SlotId), TransformState>,
    flush_waiters: Vec<oneshot::Sender<SessionResult<()>>>,
    export_jobs: Vec<(ExportFormat, oneshot::Sender<SessionResult<Vec<ExportedFile>>>)>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut pushes: mpsc::UnboundedReceiver<Vec<PageRecord>>,
    ) {
        let mut frame = tokio::time::interval(self.frame_interval);
        frame.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(pages = self.collection.len(), "Session started");

        loop {
            let save_timer = optional_sleep(self.save_at);
            let defer_timer = optional_sleep(self.deferred_push.as_ref().map(|(at, _)| *at));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.flush_on_exit().await;
                        break;
                    }
                },
                Some(event) = internal.recv() => self.handle_internal(event),
                Some(pages) = pushes.recv() => self.on_push(pages),
                _ = frame.tick(), if !self.staged.is_empty() => self.commit_staged(),
                () = save_timer => self.on_save_timer(),
                () = defer_timer => self.on_deferred_push(),
            }

            if self.settle() {
                break;
            }
        }

        if let Some(channel) = self.push_channel.take() {
            channel.shutdown();
        }
        info!("Session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Edit(edit, reply) => {
                let result = self.edit(edit);
                let _ = reply.send(result);
            }
            Command::StageTransform {
                index,
                slot,
                transform,
            } => {
                if self.engine.is_applying_remote() {
                    debug!(index, slot = %slot, "Transform dropped while applying remote state");
                } else {
                    self.staged.insert((index, slot), transform);
                }
            }
            Command::SelectImage(name, reply) => {
                let result = self.ensure_idle().and_then(|()| {
                    self.collection
                        .select_image(&name)
                        .map_err(SessionError::from)
                });
                let _ = reply.send(result);
            }
            Command::ClearSelection => self.collection.clear_selection(),
            Command::PlaceSelected { index, slot, reply } => {
                let result = self.place_selected(index, &slot);
                let _ = reply.send(result);
            }
            Command::Upload(uploads, reply) => self.upload(uploads, reply),
            Command::DeleteImage(name, reply) => self.delete_image(name, reply),
            Command::Reset(reply) => self.load_remote(LoadKind::Reset, reply),
            Command::Import(archive, reply) => self.load_remote(LoadKind::Import(archive), reply),
            Command::ExportState(reply) => {
                let remote = Arc::clone(&self.remote);
                tokio::spawn(async move {
                    let result = remote.export_state().await.map_err(SessionError::from);
                    let _ = reply.send(result);
                });
            }
            Command::ExportPages(format, reply) => {
                self.flush_now();
                self.export_jobs.push((format, reply));
            }
            Command::RebuildOverlays(reply) => self.rebuild_overlays(reply),
            Command::Flush(reply) => {
                self.flush_now();
                self.flush_waiters.push(reply);
            }
            Command::SetVisible(visible) => {
                if let Some(channel) = &self.push_channel {
                    channel.set_visible(visible);
                }
            }
            Command::Shutdown(reply) => {
                self.flush_now();
                self.shutdown = Some(reply);
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Persisted {
                token,
                signature,
                result,
            } => {
                if let Err(reason) = &result {
                    warn!(token = token.get(), error = %reason, "Save failed, keeping local state");
                }
                let effects = self.engine.persist_finished(token, signature, result);
                self.apply(effects);
            }
            Internal::Uploaded { result, reply } => {
                let result = result.map_err(SessionError::from).map(|names| {
                    for name in &names {
                        self.collection.add_image(name.clone());
                    }
                    info!(count = names.len(), "Images uploaded");
                    names
                });
                let _ = reply.send(result);
            }
            Internal::ImageDeleted {
                name,
                result,
                reply,
            } => {
                let result = match result {
                    Ok(()) => {
                        self.render
                            .images
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&name);
                        self.collection
                            .delete_image(&name)
                            .map_err(SessionError::from)
                            .inspect(|mutation| self.record(*mutation))
                    }
                    Err(err) => Err(err.into()),
                };
                let _ = reply.send(result);
            }
            Internal::Loaded { result, reply } => {
                let result = match result {
                    Ok(state) => {
                        let signature = signature_of(&state.pages).ok();
                        self.staged.clear();
                        self.collection
                            .apply_loaded_state(state.pages, state.images);
                        self.engine.rebuild_finished(signature);
                        self.render
                            .images
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clear();
                        info!(pages = self.collection.len(), "Remote state loaded");
                        Ok(self.snapshot())
                    }
                    Err(err) => {
                        self.engine.rebuild_finished(None);
                        Err(err.into())
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    fn ensure_idle(&self) -> SessionResult<()> {
        if self.engine.is_applying_remote() {
            Err(SessionError::Busy)
        } else {
            Ok(())
        }
    }

    fn edit(&mut self, edit: Edit) -> SessionResult<Mutation> {
        self.ensure_idle()?;
        let mutation = match edit {
            Edit::AddPage(seed) => {
                if let Some(page) = &seed {
                    self.render.resolver.resolve(&page.layout_name)?;
                }
                self.collection.add_page(seed)
            }
            Edit::DeletePage(index) => self.collection.delete_page(index)?,
            Edit::ChangeLayout { index, layout } => {
                self.render.resolver.resolve(&layout)?;
                self.collection.change_layout(index, &layout)?
            }
            Edit::Assign { index, slot, image } => self.collection.assign(index, &slot, &image)?,
            Edit::ClearSlot { index, slot } => self.collection.clear_slot(index, &slot)?,
            Edit::SetTransform {
                index,
                slot,
                transform,
            } => {
                let mutation = self.collection.set_transform(index, &slot, transform)?;
                self.staged.remove(&(index, slot));
                mutation
            }
            Edit::SetGutterColor { index, color } => {
                self.collection.set_gutter_color(index, &color)?
            }
            Edit::ToggleLock(index) => self.collection.toggle_lock(index)?,
            Edit::SetLocked { index, locked } => self.collection.set_locked(index, locked)?,
        };
        self.record(mutation);
        Ok(mutation)
    }

    fn place_selected(&mut self, index: usize, slot: &str) -> SessionResult<Placement> {
        self.ensure_idle()?;
        let placement = self.collection.place_selected(index, slot)?;
        if let Placement::Placed(mutation) = placement {
            self.record(mutation);
        }
        Ok(placement)
    }

    fn record(&mut self, mutation: Mutation) {
        if mutation.is_structural() {
            self.staged.clear();
        }
        let effects = self.engine.local_change(mutation, Instant::now());
        self.apply(effects);
    }

    fn commit_staged(&mut self) {
        let mut combined = Mutation::Unchanged;
        for ((index, slot), transform) in mem::take(&mut self.staged) {
            match self.collection.set_transform(index, &slot, transform) {
                Ok(mutation) => combined = combined.max(mutation),
                Err(err) => debug!(index, slot = %slot, error = %err, "Dropping staged transform"),
            }
        }
        self.record(combined);
    }

    fn flush_now(&mut self) {
        if !self.staged.is_empty() {
            self.commit_staged();
        }
        let effects = self.engine.flush();
        self.apply(effects);
    }

    fn upload(
        &mut self,
        uploads: Vec<ImageUpload>,
        reply: oneshot::Sender<SessionResult<Vec<String>>>,
    ) {
        if let Err(err) = self.ensure_idle() {
            let _ = reply.send(Err(err));
            return;
        }
        if uploads.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return;
        }
        if let Err(err) = uploads.iter().try_for_each(|upload| upload.validate().map(|_| ())) {
            let _ = reply.send(Err(err.into()));
            return;
        }
        let remote = Arc::clone(&self.remote);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = remote.upload_images(uploads).await;
            let _ = internal.send(Internal::Uploaded { result, reply });
        });
    }

    fn delete_image(&mut self, name: String, reply: oneshot::Sender<SessionResult<Mutation>>) {
        if let Err(err) = self.ensure_idle() {
            let _ = reply.send(Err(err));
            return;
        }
        if !self.collection.library().contains(&name) {
            let _ = reply.send(Err(comic_core::CoreError::UnknownImage(name).into()));
            return;
        }
        let remote = Arc::clone(&self.remote);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = remote.delete_image(&name).await;
            let _ = internal.send(Internal::ImageDeleted {
                name,
                result,
                reply,
            });
        });
    }

    fn load_remote(
        &mut self,
        kind: LoadKind,
        reply: oneshot::Sender<SessionResult<SessionSnapshot>>,
    ) {
        let Some(effects) = self.engine.begin_remote_apply() else {
            let _ = reply.send(Err(SessionError::Busy));
            return;
        };
        self.apply(effects);
        self.staged.clear();
        let remote = Arc::clone(&self.remote);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = match kind {
                LoadKind::Reset => remote.reset_state().await,
                LoadKind::Import(archive) => remote.import_state(archive).await,
            };
            let _ = internal.send(Internal::Loaded { result, reply });
        });
    }

    fn rebuild_overlays(&mut self, reply: oneshot::Sender<SessionResult<Vec<String>>>) {
        let Some(store) = self.overlay_store.clone() else {
            let _ = reply.send(Err(RenderError::Overlay(
                "no overlay store configured".to_string(),
            )
            .into()));
            return;
        };
        let render = Arc::clone(&self.render);
        tokio::spawn(async move {
            let result = render
                .silhouettes
                .rebuild_all(
                    &render.resolver,
                    render.provider.as_ref(),
                    store.as_ref(),
                    render.compositor.scale,
                )
                .await
                .map_err(SessionError::from);
            let _ = reply.send(result);
        });
    }

    fn on_push(&mut self, pages: Vec<PageRecord>) {
        let local = match self.collection.signature() {
            Ok(signature) => signature,
            Err(err) => {
                warn!(error = %err, "Cannot sign local pages, ignoring push");
                return;
            }
        };
        let effects = self.engine.push_received(pages, &local, Instant::now());
        self.apply(effects);
    }

    fn on_deferred_push(&mut self) {
        if let Some((_, pages)) = self.deferred_push.take() {
            self.on_push(pages);
        }
    }

    fn on_save_timer(&mut self) {
        self.save_at = None;
        let effects = self.engine.debounce_elapsed(Instant::now());
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<SyncEffect>) {
        for effect in effects {
            match effect {
                SyncEffect::ScheduleSave { at } => self.save_at = Some(at),
                SyncEffect::CancelSave => self.save_at = None,
                SyncEffect::Persist { token } => self.persist(token),
                SyncEffect::RebuildLocal { signature } => {
                    let pages = self.collection.pages().to_vec();
                    self.collection.rebuild(pages);
                    self.engine.rebuild_finished(Some(signature));
                }
                SyncEffect::ApplyRemote { pages, signature } => {
                    self.staged.clear();
                    info!(pages = pages.len(), "Applying pushed pages");
                    self.collection.rebuild(pages);
                    self.engine.rebuild_finished(Some(signature));
                }
                SyncEffect::DeferPush { pages, at } => self.deferred_push = Some((at, pages)),
                SyncEffect::Status(status) => {
                    self.status.send_replace(status);
                }
            }
        }
    }

    fn persist(&mut self, token: PersistToken) {
        self.save_at = None;
        let pages = self.collection.pages().to_vec();
        let signature = match signature_of(&pages) {
            Ok(signature) => signature,
            Err(err) => {
                let effects = self
                    .engine
                    .persist_finished(token, String::new(), Err(err.to_string()));
                self.apply(effects);
                return;
            }
        };
        debug!(token = token.get(), pages = pages.len(), "Persisting pages");
        let remote = Arc::clone(&self.remote);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = remote
                .save_pages(&pages)
                .await
                .map_err(|err| err.to_string());
            let _ = internal.send(Internal::Persisted {
                token,
                signature,
                result,
            });
        });
    }

    /// Answer flush waiters and start exports once nothing is pending.
    /// Returns true when a shutdown was acknowledged.
    fn settle(&mut self) -> bool {
        if !self.engine.is_settled() || self.engine.is_applying_remote() {
            return false;
        }
        let failure = self.engine.last_failure().map(str::to_string);
        for waiter in self.flush_waiters.drain(..) {
            let result = match &failure {
                Some(reason) => Err(SessionError::SaveFailed(reason.clone())),
                None => Ok(()),
            };
            let _ = waiter.send(result);
        }
        for (format, reply) in mem::take(&mut self.export_jobs) {
            self.spawn_export(format, reply);
        }
        if let Some(done) = self.shutdown.take() {
            let _ = done.send(());
            return true;
        }
        false
    }

    async fn flush_on_exit(&mut self) {
        if !matches!(self.engine.save_state(), SaveState::PendingSave { .. })
            || self.engine.is_applying_remote()
        {
            return;
        }
        let pages = self.collection.pages().to_vec();
        if let Err(err) = self.remote.save_pages(&pages).await {
            warn!(error = %err, "Final save failed");
        }
    }

    fn spawn_export(
        &self,
        format: ExportFormat,
        reply: oneshot::Sender<SessionResult<Vec<ExportedFile>>>,
    ) {
        let pages = self.collection.pages().to_vec();
        let render = Arc::clone(&self.render);
        let remote = Arc::clone(&self.remote);
        let overlay_store = self.overlay_store.clone();
        tokio::spawn(async move {
            let result = render_pages(render, remote, overlay_store, pages, format).await;
            if let Err(err) = &result {
                warn!(error = %err, "Export failed");
            }
            let _ = reply.send(result);
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let library = self.collection.library();
        SessionSnapshot {
            pages: self.collection.pages().to_vec(),
            images: library.iter().map(str::to_string).collect(),
            partition: self.collection.partition(),
            selection: library.selection().map(str::to_string),
            save_state: self.engine.save_state(),
            remote_state: self.engine.remote_state(),
            last_acknowledged: self.engine.last_acknowledged().map(str::to_string),
        }
    }
}

fn optional_sleep(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[instrument(skip_all, fields(pages = pages.len(), ?format))]
async fn render_pages(
    render: Arc<RenderContext>,
    remote: Arc<dyn RemoteStore>,
    overlay_store: Option<Arc<dyn OverlayStore>>,
    pages: Vec<PageRecord>,
    format: ExportFormat,
) -> SessionResult<Vec<ExportedFile>> {
    let (mut images, missing) = {
        let mut cache = render.images.lock().unwrap_or_else(PoisonError::into_inner);
        cache.maintenance();
        cache.lookup_many(pages.iter().flat_map(|page| page.images()))
    };

    if !missing.is_empty() {
        debug!(count = missing.len(), "Fetching images for export");
        let store = remote.as_ref();
        let fetched = join_all(missing.iter().map(|name| async move {
            store
                .fetch_image(name)
                .await
                .map(|bytes| (name.clone(), bytes))
                .map_err(|err| {
                    RenderError::Precondition(format!("Image {name} could not be loaded: {err}"))
                })
        }))
        .await;
        let sources = fetched.into_iter().collect::<Result<Vec<_>, _>>()?;
        let decoded = decode_all(sources).await?;
        render
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_all(&decoded, &missing);
        images.extend(decoded);
    }

    let mut silhouettes: HashMap<String, Arc<Pixmap>> = HashMap::new();
    if render.compositor.overlays {
        let layouts: BTreeSet<&str> = pages.iter().map(|p| p.layout_name.as_str()).collect();
        for layout in layouts {
            match render
                .silhouettes
                .load_or_generate(
                    layout,
                    &render.resolver,
                    render.provider.as_ref(),
                    overlay_store.as_deref(),
                    render.compositor.scale,
                )
                .await
            {
                Ok(pixmap) => {
                    silhouettes.insert(layout.to_string(), pixmap);
                }
                Err(err) => warn!(template = layout, error = %err, "Exporting without silhouette"),
            }
        }
    }

    let timestamp = unix_millis();
    let files = tokio::task::spawn_blocking(move || -> SessionResult<Vec<ExportedFile>> {
        let rasters = compose_pages(
            &pages,
            &render.resolver,
            render.provider.as_ref(),
            &images,
            &render.compositor,
            |record| {
                silhouettes.get(&record.layout_name).map(|silhouette| {
                    tint(silhouette, Rgba::gutter_or_default(Some(record.gutter_color.as_str())))
                })
            },
        )?;
        Ok(render.exporter.export(&rasters, format, timestamp)?)
    })
    .await
    .map_err(|err| RenderError::Export(format!("export task failed: {err}")))??;

    info!(files = files.len(), "Export finished");
    Ok(files)
}
