//! The physics world: lifecycle, node management and stepping.
//!
//! [`WorldPhysics`] is shared between the stepping thread and its
//! collaborators. All simulation state lives behind one mutex, so a step runs
//! to completion before any other mutation. The debug draw buffer has its own
//! mutex and is replaced wholesale once per step.
//!
//! # Step pipeline
//!
//! ```text
//! detect ─► synthesize ─► integrate ─► commit ─► propagate
//! ```
//!
//! World parameters are read from the configuration on every step, so a
//! setter takes effect on the next call. Contact bookkeeping and ray values
//! are committed only once integration succeeds; a failed step leaves the
//! previous step's records in place.
//!
//! Diagnostics raised during a call are collected per call and delivered to
//! the sink and error handler after the state lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rigsim_graph::TransformStore;
use rigsim_types::{
    ContactParameters, FrameId, GroupId, Integrator, JointId, MassProperties, NodeId, Pose,
    SimError, SimulationConfig, Twist,
};

use crate::arena::{Arena, Handle};
use crate::composite::CompositeBodyRegistry;
use crate::detection::{CollisionEngine, GeomView, RayView};
use crate::diagnostics::{DiagnosticCallback, StepDiagnostics};
use crate::joint::{JointDescriptor, UserJoint};
use crate::map::{ActiveMap, HeightFieldProvider, MapRegistry};
use crate::node::{GeomData, NodeDescriptor, SimBody, SimNode};
use crate::solver::{self, JointInput, JointSide};
use crate::synthesizer::{ConstraintSynthesizer, ContactFeedback, ContactJoint, Synthesis};
use crate::sync::{NodePose, PoseSource, TransformSynchronizer};

type Result<T> = rigsim_types::Result<T>;

/// What a call to [`WorldPhysics::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The world is not initialized or the step size is not positive.
    Skipped,
    /// The world advanced by one step.
    Completed {
        /// Contact joints solved in this step.
        contacts: usize,
    },
}

impl StepOutcome {
    /// Whether the world advanced.
    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Contact marker for a debug renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    /// World position of the contact.
    pub position: Point3<f64>,
    /// Contact normal.
    pub normal: Vector3<f64>,
    /// Penetration depth after correction.
    pub depth: f64,
}

struct Attachment {
    store: Arc<dyn TransformStore>,
    sync: TransformSynchronizer,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

/// Everything allocated by `initialize()` and released by `finalize()`.
#[derive(Debug, Default)]
struct Live {
    bodies: Arena<SimBody>,
    nodes: Arena<SimNode>,
    node_ids: HashMap<NodeId, Handle<SimNode>>,
    joints: Arena<UserJoint>,
    joint_ids: HashMap<JointId, Handle<UserJoint>>,
    composite: CompositeBodyRegistry,
    contacts: Vec<ContactJoint>,
    feedback: Vec<ContactFeedback>,
    next_node: u64,
    next_joint: u64,
}

#[derive(Debug, Default)]
struct WorldState {
    config: SimulationConfig,
    live: Option<Live>,
    maps: MapRegistry,
    attachment: Option<Attachment>,
    error_handler: Option<DiagnosticCallback>,
    sink: Option<DiagnosticCallback>,
    diagnostics: StepDiagnostics,
    time: f64,
}

/// A rigid-body world.
///
/// # Example
///
/// ```
/// use rigsim_core::{CollisionShape, NodeDescriptor, WorldPhysics};
/// use rigsim_types::{Point3, SimulationConfig};
///
/// let world = WorldPhysics::new(SimulationConfig::default());
/// world.initialize().unwrap();
///
/// world
///     .create_node(NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0)).fixed())
///     .unwrap();
/// let ball = world
///     .create_node(
///         NodeDescriptor::new("ball", CollisionShape::sphere(0.1))
///             .at_position(Point3::new(0.0, 0.0, 1.0)),
///     )
///     .unwrap();
///
/// for _ in 0..10 {
///     world.step().unwrap();
/// }
/// assert!(world.node_pose(ball).unwrap().position.z < 1.0);
/// ```
#[derive(Debug, Default)]
pub struct WorldPhysics {
    state: Mutex<WorldState>,
    draw: Mutex<Vec<DrawItem>>,
}

impl WorldPhysics {
    /// Uninitialized world with the given configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            state: Mutex::new(WorldState {
                config,
                ..WorldState::default()
            }),
            draw: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, WorldState>> {
        self.state.lock().map_err(|_| SimError::LockPoisoned)
    }

    /// Run `f` under the state lock, then deliver the diagnostics it raised
    /// with the lock released.
    fn with_state<T>(&self, f: impl FnOnce(&mut WorldState) -> Result<T>) -> Result<T> {
        let (result, mut diagnostics, sink, handler) = {
            let mut state = self.lock()?;
            let result = f(&mut state);
            (
                result,
                std::mem::take(&mut state.diagnostics),
                state.sink.clone(),
                state.error_handler.clone(),
            )
        };
        diagnostics.flush(sink.as_ref(), handler.as_ref());
        result
    }

    fn with_live<T>(&self, f: impl FnOnce(&mut Live) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let live = state.live.as_mut().ok_or(SimError::NotInitialized)?;
        f(live)
    }

    // ==================== Lifecycle ====================

    /// Allocate the world. Does nothing when already initialized.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.live.is_none() {
            state.live = Some(Live::default());
            state.time = 0.0;
            tracing::info!("physics world initialized");
        }
        Ok(())
    }

    /// Release the world and everything in it. Safe to call repeatedly.
    pub fn finalize(&self) -> Result<()> {
        {
            let mut state = self.lock()?;
            if state.live.take().is_some() {
                tracing::info!("physics world finalized");
            }
            state.diagnostics = StepDiagnostics::new();
            state.time = 0.0;
        }
        self.draw.lock().map_err(|_| SimError::LockPoisoned)?.clear();
        Ok(())
    }

    /// Whether the world is initialized.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.lock().is_ok_and(|state| state.live.is_some())
    }

    /// Simulation time in seconds.
    pub fn time(&self) -> Result<f64> {
        Ok(self.lock()?.time)
    }

    // ==================== Configuration ====================

    /// Current configuration.
    pub fn config(&self) -> Result<SimulationConfig> {
        Ok(self.lock()?.config.clone())
    }

    /// Replace the whole configuration.
    pub fn set_config(&self, config: SimulationConfig) -> Result<()> {
        self.lock()?.config = config;
        Ok(())
    }

    /// Set gravity. Takes effect at the next step.
    pub fn set_gravity(&self, gravity: Vector3<f64>) -> Result<()> {
        self.lock()?.config.gravity = gravity;
        Ok(())
    }

    /// Set the global constraint force mixing.
    pub fn set_cfm(&self, cfm: f64) -> Result<()> {
        self.lock()?.config.cfm = cfm;
        Ok(())
    }

    /// Set the global error reduction parameter.
    pub fn set_erp(&self, erp: f64) -> Result<()> {
        self.lock()?.config.erp = erp;
        Ok(())
    }

    /// Set the step size. A non-positive value pauses stepping.
    pub fn set_step_size(&self, step_size: f64) -> Result<()> {
        self.lock()?.config.step_size = step_size;
        Ok(())
    }

    /// Select the integrator.
    pub fn set_integrator(&self, integrator: Integrator) -> Result<()> {
        self.lock()?.config.integrator = integrator;
        Ok(())
    }

    /// Install the driver's handler for error diagnostics.
    pub fn set_error_handler(&self, handler: DiagnosticCallback) -> Result<()> {
        self.lock()?.error_handler = Some(handler);
        Ok(())
    }

    /// Install an observer for every diagnostic.
    pub fn set_sink(&self, sink: DiagnosticCallback) -> Result<()> {
        self.lock()?.sink = Some(sink);
        Ok(())
    }

    // ==================== Nodes and joints ====================

    /// Create a node.
    ///
    /// # Errors
    ///
    /// [`SimError::NotInitialized`] before `initialize()`, and
    /// [`SimError::ResourceAllocation`] for degenerate shapes, poses or
    /// masses. Nothing is registered on failure.
    pub fn create_node(&self, desc: NodeDescriptor) -> Result<NodeId> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let live = state.live.as_mut().ok_or(SimError::NotInitialized)?;
        desc.validate()?;

        let id = NodeId(live.next_node);
        live.next_node += 1;
        let node = live.allocate(id, &desc);
        let frame = node.frame.clone();
        let handle = live.nodes.insert(node);
        live.node_ids.insert(id, handle);
        if let Some(group) = desc.group.filter(|_| desc.movable) {
            live.refresh_group_offsets(group);
        }

        if let (Some(frame), Some(attachment)) = (frame, state.attachment.as_mut()) {
            attachment.sync.bind(frame, id);
        }
        tracing::debug!(node = %id, name = %desc.name, kind = desc.shape.kind(), "created node");
        Ok(id)
    }

    /// Remove a node, its body (or group membership) and its joints.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let live = state.live.as_mut().ok_or(SimError::NotInitialized)?;
        let handle = live
            .node_ids
            .remove(&id)
            .ok_or(SimError::UnknownNode(id.0))?;
        let Some(node) = live.nodes.remove(handle) else {
            return Err(SimError::UnknownNode(id.0));
        };

        match node.group {
            Some(group) => {
                live.composite.remove(&mut live.bodies, id);
                live.refresh_group_offsets(group);
            }
            None => {
                if let Some(body) = node.body {
                    live.bodies.remove(body);
                }
            }
        }

        let stale: Vec<JointId> = live
            .joints
            .iter()
            .filter(|(_, j)| j.involves(id))
            .map(|(_, j)| j.id)
            .collect();
        for joint in stale {
            live.remove_joint(joint);
        }

        if let Some(attachment) = state.attachment.as_mut() {
            attachment.sync.unbind_node(id);
        }
        tracing::debug!(node = %id, "removed node");
        Ok(())
    }

    /// Number of nodes.
    pub fn node_count(&self) -> Result<usize> {
        self.with_live(|live| Ok(live.nodes.len()))
    }

    /// Join two nodes, or a node and the world. Joined nodes never collide.
    pub fn create_joint(&self, desc: JointDescriptor) -> Result<JointId> {
        self.with_live(|live| {
            if desc.second == Some(desc.first) {
                return Err(SimError::invalid_config("a joint needs two distinct nodes"));
            }
            let first = live.world_pose(live.node(desc.first)?);
            let second = match desc.second {
                Some(node) => live.world_pose(live.node(node)?),
                None => Pose::identity(),
            };

            let id = JointId(live.next_joint);
            live.next_joint += 1;
            let handle = live.joints.insert(UserJoint::new(id, &desc, &first, &second));
            live.joint_ids.insert(id, handle);
            tracing::debug!(joint = %id, first = %desc.first, "created joint");
            Ok(id)
        })
    }

    /// Remove a joint.
    pub fn remove_joint(&self, id: JointId) -> Result<()> {
        self.with_live(|live| {
            if live.remove_joint(id) {
                Ok(())
            } else {
                Err(SimError::UnknownJoint(id.0))
            }
        })
    }

    // ==================== Node state ====================

    /// World pose of a node.
    pub fn node_pose(&self, id: NodeId) -> Result<Pose> {
        self.with_live(|live| Ok(live.world_pose(live.node(id)?)))
    }

    /// Move a node. A grouped node carries its whole group along.
    pub fn set_node_pose(&self, id: NodeId, pose: Pose) -> Result<()> {
        self.with_live(|live| {
            let handle = live.handle(id)?;
            let Some(node) = live.nodes.get_mut(handle) else {
                return Err(SimError::UnknownNode(id.0));
            };
            match node.body.and_then(|b| live.bodies.get_mut(b)) {
                Some(body) => body.state.pose = pose.compose(&node.offset.inverse()),
                None => node.offset = pose,
            }
            Ok(())
        })
    }

    /// Velocity of the body carrying a node, at its center of mass. Static
    /// nodes report zero.
    pub fn node_velocity(&self, id: NodeId) -> Result<Twist> {
        self.with_live(|live| {
            Ok(live
                .body_of(id)?
                .map_or_else(Twist::zero, |b| b.state.twist))
        })
    }

    /// Set the linear velocity of a node's body. No effect on static nodes.
    pub fn set_linear_velocity(&self, id: NodeId, velocity: Vector3<f64>) -> Result<()> {
        self.with_live(|live| {
            if let Some(body) = live.body_of_mut(id)? {
                body.state.twist.linear = velocity;
            }
            Ok(())
        })
    }

    /// Set the angular velocity of a node's body. No effect on static nodes.
    pub fn set_angular_velocity(&self, id: NodeId, velocity: Vector3<f64>) -> Result<()> {
        self.with_live(|live| {
            if let Some(body) = live.body_of_mut(id)? {
                body.state.twist.angular = velocity;
            }
            Ok(())
        })
    }

    /// Add a world-frame force at the center of mass for the next step.
    pub fn add_force(&self, id: NodeId, force: Vector3<f64>) -> Result<()> {
        self.with_live(|live| {
            if let Some(body) = live.body_of_mut(id)? {
                body.force += force;
            }
            Ok(())
        })
    }

    /// Add a world-frame torque for the next step.
    pub fn add_torque(&self, id: NodeId, torque: Vector3<f64>) -> Result<()> {
        self.with_live(|live| {
            if let Some(body) = live.body_of_mut(id)? {
                body.torque += torque;
            }
            Ok(())
        })
    }

    /// Nodes touched in the last step, one entry per contact; `None` stands
    /// for a map.
    pub fn node_contact_ids(&self, id: NodeId) -> Result<Vec<Option<NodeId>>> {
        self.with_live(|live| Ok(live.node(id)?.geom.contact_ids.clone()))
    }

    /// Contact positions recorded in the last step.
    pub fn node_contact_points(&self, id: NodeId) -> Result<Vec<Point3<f64>>> {
        self.with_live(|live| Ok(live.node(id)?.geom.contact_points.clone()))
    }

    /// Number of contacts recorded in the last step.
    pub fn node_collision_count(&self, id: NodeId) -> Result<usize> {
        self.with_live(|live| Ok(live.node(id)?.geom.num_contacts))
    }

    /// Total contact force on a force-sensing node in the last step.
    ///
    /// Zero for nodes that don't sense contact force.
    pub fn node_contact_force(&self, id: NodeId) -> Result<Vector3<f64>> {
        self.with_live(|live| {
            let node = live.node(id)?;
            Ok(contact_force(&node.geom, &live.feedback))
        })
    }

    /// Nearest hit distance of a ray sensor in the last step; its length when
    /// nothing was hit. Zero for other nodes.
    pub fn sensed_value(&self, id: NodeId) -> Result<f64> {
        self.with_live(|live| Ok(live.node(id)?.sensed))
    }

    /// Rigid group of a node.
    pub fn node_group(&self, id: NodeId) -> Result<Option<GroupId>> {
        self.with_live(|live| {
            live.node(id)?;
            Ok(live.composite.group_of(id))
        })
    }

    /// Connected members of a group; zero when the group doesn't exist.
    pub fn group_member_count(&self, group: GroupId) -> Result<usize> {
        self.with_live(|live| Ok(live.composite.group(group).map_or(0, |g| g.connected())))
    }

    /// Mass-weighted mean of the nodes' world centers of mass.
    ///
    /// Absolute masses are used. An empty or massless set yields zero.
    pub fn get_center_of_mass(&self, nodes: &[NodeId]) -> Result<Vector3<f64>> {
        self.with_live(|live| {
            let mut total = 0.0;
            let mut weighted = Vector3::zeros();
            for &id in nodes {
                let node = live.node(id)?;
                let mass = node.mass.mass.abs();
                let com = live
                    .world_pose(node)
                    .transform_point(&Point3::from(node.mass.center_of_mass));
                total += mass;
                weighted += com.coords * mass;
            }
            Ok(if total > 0.0 {
                weighted / total
            } else {
                Vector3::zeros()
            })
        })
    }

    // ==================== Maps and synchronization ====================

    /// Register a height-field map under `frame`.
    ///
    /// `pose` places the map when the transform store doesn't know the frame.
    pub fn register_map(
        &self,
        frame: impl Into<FrameId>,
        provider: Arc<dyn HeightFieldProvider>,
        pose: Pose,
    ) -> Result<()> {
        let frame = frame.into();
        tracing::debug!(%frame, "registered map");
        self.lock()?.maps.register(frame, provider, pose);
        Ok(())
    }

    /// Remove the map under `frame`. Returns whether one was registered.
    pub fn remove_map(&self, frame: &FrameId) -> Result<bool> {
        Ok(self.lock()?.maps.remove(frame))
    }

    /// Propagate solved poses into `store` at the end of every step.
    ///
    /// Nodes created with a frame binding are bound in `sync`, including
    /// nodes that already exist.
    pub fn attach_synchronizer(
        &self,
        store: Arc<dyn TransformStore>,
        mut sync: TransformSynchronizer,
    ) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(live) = state.live.as_ref() {
            for (_, node) in live.nodes.iter() {
                if let Some(frame) = &node.frame {
                    sync.bind(frame.clone(), node.id);
                }
            }
        }
        tracing::debug!(root = %sync.root(), "attached transform synchronizer");
        state.attachment = Some(Attachment { store, sync });
        Ok(())
    }

    /// Detach the synchronizer, handing it back.
    pub fn detach_synchronizer(&self) -> Result<Option<TransformSynchronizer>> {
        Ok(self.lock()?.attachment.take().map(|a| a.sync))
    }

    /// The draw buffer published by the last step.
    pub fn draw_items(&self) -> Result<Vec<DrawItem>> {
        Ok(self
            .draw
            .lock()
            .map_err(|_| SimError::LockPoisoned)?
            .clone())
    }

    // ==================== Stepping and queries ====================

    /// Advance the world by one step.
    ///
    /// Returns [`StepOutcome::Skipped`] when the world is not initialized or
    /// the step size is not positive.
    ///
    /// # Errors
    ///
    /// [`SimError::Integration`] when the solver produced a non-finite state;
    /// no pose changes in that case. [`SimError::StructuralLoop`] when the
    /// attached transform structure is not a tree; the integrated state is
    /// kept but nothing is written to the store.
    pub fn step(&self) -> Result<StepOutcome> {
        self.with_state(|state| state.step(&self.draw))
    }

    /// Count colliding pairs without changing anything.
    ///
    /// A pair collides when at least one of its contacts penetrates. Map
    /// pairs are included.
    pub fn check_collisions_only(&self) -> Result<usize> {
        self.with_state(|state| {
            let live = state.live.as_ref().ok_or(SimError::NotInitialized)?;
            let maps = state.resolve_maps();
            let engine = CollisionEngine::from_config(&state.config);
            let connected = live.connections();
            let is_connected = |a: NodeId, b: NodeId| connected.contains(&(a, b));

            let (geoms, _) = live.geom_views();
            let pairs = engine.detect(&geoms, &maps, &is_connected, &mut state.diagnostics);
            Ok(pairs
                .iter()
                .filter(|p| p.manifold.has_penetration())
                .count())
        })
    }

    /// Cast a ray from `origin` along `direction`; the direction's length is
    /// the ray length.
    ///
    /// Returns the nearest hit distance, or the ray length when nothing is
    /// hit.
    pub fn cast_ray(&self, origin: Point3<f64>, direction: Vector3<f64>) -> Result<f64> {
        let length = direction.norm();
        if !(length > 0.0) || !length.is_finite() {
            return Ok(0.0);
        }
        self.with_state(|state| {
            let live = state.live.as_ref().ok_or(SimError::NotInitialized)?;
            let maps = state.resolve_maps();
            let rotation = UnitQuaternion::rotation_between(&Vector3::z(), &direction)
                .unwrap_or_else(|| {
                    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
                });
            let ray = RayView {
                node: None,
                pose: Pose::from_position_rotation(origin, rotation),
                length,
                body: None,
                params: ContactParameters::default().with_bitmask(u32::MAX),
                exclude_geom: None,
                exclude_body: None,
            };
            let (geoms, _) = live.geom_views();
            Ok(CollisionEngine::from_config(&state.config).sense(&ray, &geoms, &maps))
        })
    }

    /// Largest penetration of a node's geometry against every other
    /// geometry and the active maps. Zero when nothing penetrates.
    pub fn get_collision_depth(&self, id: NodeId) -> Result<f64> {
        self.with_state(|state| {
            let live = state.live.as_ref().ok_or(SimError::NotInitialized)?;
            let handle = live.handle(id)?;
            let maps = state.resolve_maps();
            let connected = live.connections();
            let is_connected = |a: NodeId, b: NodeId| connected.contains(&(a, b));

            let (geoms, handles) = live.geom_views();
            let Some(index) = handles.iter().position(|&h| h == handle) else {
                return Ok(0.0);
            };
            let engine = CollisionEngine {
                contact_margin: 0.0,
                step_size: 0.0,
                gravity: 0.0,
            };
            let me = &geoms[index];
            let diagnostics = &mut state.diagnostics;

            let pair_depths = geoms
                .iter()
                .enumerate()
                .filter(|&(j, other)| j != index && engine.eligible(me, other, &is_connected))
                .filter_map(|(_, other)| engine.collide_pair(me, other, 0.0, diagnostics))
                .filter_map(|m| m.max_depth())
                .collect::<Vec<_>>();
            let map_depths = maps
                .iter()
                .filter_map(|map| engine.collide_map(me, map, 0.0, diagnostics))
                .filter_map(|m| m.max_depth())
                .collect::<Vec<_>>();

            Ok(pair_depths
                .into_iter()
                .chain(map_depths)
                .fold(0.0, f64::max))
        })
    }
}

impl WorldState {
    fn resolve_maps(&self) -> Vec<ActiveMap> {
        let store = self
            .attachment
            .as_ref()
            .map(|a| (a.store.as_ref(), a.sync.root()));
        self.maps.resolve(store)
    }

    fn step(&mut self, draw: &Mutex<Vec<DrawItem>>) -> Result<StepOutcome> {
        if self.live.is_none() || !self.config.is_stepping() {
            return Ok(StepOutcome::Skipped);
        }
        if let Err(err) = self.config.validate() {
            self.diagnostics.error(format!("step skipped: {err}"));
            return Ok(StepOutcome::Skipped);
        }
        let config = self.config.clone();
        let maps = self.resolve_maps();
        let Some(live) = self.live.as_mut() else {
            return Ok(StepOutcome::Skipped);
        };

        let (synthesis, sensed) = live.detect(&config, &maps, &mut self.diagnostics);

        let inputs = joint_inputs(&live.joints, &live.nodes, &live.node_ids);
        let feedback = match solver::step(
            &config,
            &mut live.bodies,
            &inputs,
            &synthesis.joints,
            synthesis.feedback_slots,
        ) {
            Ok(feedback) => feedback,
            Err(err) => {
                self.diagnostics.error(err.to_string());
                return Err(err);
            }
        };
        live.commit(synthesis, sensed, feedback);
        self.time += config.step_size;

        let items: Vec<DrawItem> = if config.draw_contact_points {
            live.contacts
                .iter()
                .map(|c| DrawItem {
                    position: c.position,
                    normal: c.normal,
                    depth: c.depth,
                })
                .collect()
        } else {
            Vec::new()
        };
        *draw.lock().map_err(|_| SimError::LockPoisoned)? = items;

        if let Some(attachment) = self.attachment.as_mut() {
            let poses = LivePoses(live);
            if let Err(err) = attachment
                .sync
                .propagate(attachment.store.as_ref(), &poses, self.time)
            {
                self.diagnostics.error(err.to_string());
                return Err(err);
            }
        }

        Ok(StepOutcome::Completed {
            contacts: live.contacts.len(),
        })
    }
}

impl Live {
    fn handle(&self, id: NodeId) -> Result<Handle<SimNode>> {
        self.node_ids
            .get(&id)
            .copied()
            .ok_or(SimError::UnknownNode(id.0))
    }

    fn node(&self, id: NodeId) -> Result<&SimNode> {
        self.nodes
            .get(self.handle(id)?)
            .ok_or(SimError::UnknownNode(id.0))
    }

    fn body_of(&self, id: NodeId) -> Result<Option<&SimBody>> {
        Ok(self.node(id)?.body.and_then(|b| self.bodies.get(b)))
    }

    fn body_of_mut(&mut self, id: NodeId) -> Result<Option<&mut SimBody>> {
        let body = self.node(id)?.body;
        Ok(body.and_then(|b| self.bodies.get_mut(b)))
    }

    fn world_pose(&self, node: &SimNode) -> Pose {
        node.body
            .and_then(|b| self.bodies.get(b))
            .map_or(node.offset, |b| b.state.pose.compose(&node.offset))
    }

    /// Build the stored node for a validated descriptor, allocating or
    /// joining its body.
    fn allocate(&mut self, id: NodeId, desc: &NodeDescriptor) -> SimNode {
        let mass = desc.local_mass();
        let mut group = None;

        let (body, offset) = if !desc.movable {
            (None, desc.pose)
        } else if let Some(g) = desc.group {
            let merge =
                self.composite
                    .merge_into_group(&mut self.bodies, g, id, desc.pose, mass);
            group = Some(g);
            let offset = self.composite.member_offset(id).unwrap_or_else(Pose::identity);
            (Some(merge.body), offset)
        } else {
            let com = mass.center_of_mass;
            let pose = Pose::from_position_rotation(
                desc.pose.transform_point(&Point3::from(com)),
                desc.pose.rotation,
            );
            let centered = MassProperties::new(mass.mass, Vector3::zeros(), mass.inertia);
            let body = self.bodies.insert(SimBody::new(pose, centered));
            (Some(body), Pose::from_position(Point3::from(-com)))
        };
        if desc.group.is_some() && !desc.movable {
            tracing::debug!(node = %id, "static node ignores its group");
        }

        let mut node = SimNode {
            id,
            name: desc.name.clone(),
            shape: desc.shape.clone(),
            role: desc.role,
            frame: desc.frame.clone(),
            group,
            mass,
            body,
            offset,
            collidable: desc.collidable,
            contact: desc.contact.clone(),
            exclude_geom: desc.exclude_geom,
            exclude_body: desc.exclude_body,
            sense_contact_force: desc.sense_contact_force,
            geom: GeomData::default(),
            sensed: 0.0,
        };
        node.sensed = node.ray_length();
        node
    }

    /// Copy member offsets from the registry after the group changed.
    fn refresh_group_offsets(&mut self, group: GroupId) {
        let Some(entry) = self.composite.group(group) else {
            return;
        };
        for member in entry.members() {
            if let Some(node) = self
                .node_ids
                .get(&member.node)
                .and_then(|&h| self.nodes.get_mut(h))
            {
                node.offset = member.offset;
            }
        }
    }

    fn remove_joint(&mut self, id: JointId) -> bool {
        self.joint_ids
            .remove(&id)
            .and_then(|h| self.joints.remove(h))
            .is_some()
    }

    /// Replace last step's contacts, feedback, bookkeeping and ray values
    /// with those of a step that integrated successfully.
    fn commit(
        &mut self,
        synthesis: Synthesis,
        sensed: Vec<(Handle<SimNode>, f64)>,
        feedback: Vec<ContactFeedback>,
    ) {
        for (_, node) in self.nodes.iter_mut() {
            node.geom.clear();
        }
        for (handle, value) in sensed {
            if let Some(node) = self.nodes.get_mut(handle) {
                node.sensed = value;
            }
        }
        for record in &synthesis.records {
            let Some(&handle) = self.node_ids.get(&record.node) else {
                continue;
            };
            if let Some(node) = self.nodes.get_mut(handle) {
                node.geom.record(record.other, record.point);
                if let Some(slot) = record.feedback.filter(|_| node.sense_contact_force) {
                    node.geom.feedback.push(slot);
                }
            }
        }
        self.contacts = synthesis.joints;
        self.feedback = feedback;
    }

    /// Pairs of nodes joined by a user joint, in both orders.
    fn connections(&self) -> HashSet<(NodeId, NodeId)> {
        self.joints
            .iter()
            .filter_map(|(_, j)| j.second.map(|s| (j.first, s)))
            .flat_map(|(a, b)| [(a, b), (b, a)])
            .collect()
    }

    fn geom_views(&self) -> (Vec<GeomView<'_>>, Vec<Handle<SimNode>>) {
        self.nodes
            .iter()
            .filter(|(_, node)| node.collidable && !node.is_ray())
            .map(|(handle, node)| {
                let body = node.body.and_then(|b| self.bodies.get(b));
                let speed = body.map_or(0.0, |b| {
                    let reach = node.shape.bounding_radius() + node.offset.position.coords.norm();
                    b.state.twist.linear.norm() + b.state.twist.angular.norm() * reach
                });
                let view = GeomView {
                    node: node.id,
                    shape: &node.shape,
                    pose: self.world_pose(node),
                    body: node.body,
                    params: &node.contact,
                    speed,
                };
                (view, handle)
            })
            .unzip()
    }

    fn ray_views(&self) -> Vec<(Handle<SimNode>, RayView)> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_ray())
            .map(|(handle, node)| {
                let exclude_body = node
                    .exclude_body
                    .and_then(|id| self.node(id).ok())
                    .and_then(|n| n.body);
                let view = RayView {
                    node: Some(node.id),
                    pose: self.world_pose(node),
                    length: node.ray_length(),
                    body: node.body,
                    params: node.contact.clone(),
                    exclude_geom: node.exclude_geom,
                    exclude_body,
                };
                (handle, view)
            })
            .collect()
    }

    /// Detection, ray sensing and synthesis. Nothing is written back; see
    /// [`Live::commit`].
    fn detect(
        &self,
        config: &SimulationConfig,
        maps: &[ActiveMap],
        diagnostics: &mut StepDiagnostics,
    ) -> (Synthesis, Vec<(Handle<SimNode>, f64)>) {
        let engine = CollisionEngine::from_config(config);
        let synthesizer = ConstraintSynthesizer::from_config(config);
        let connected = self.connections();
        let is_connected = |a: NodeId, b: NodeId| connected.contains(&(a, b));

        let (geoms, _) = self.geom_views();
        let pairs = engine.detect(&geoms, maps, &is_connected, diagnostics);
        let senses_force =
            |id: NodeId| self.node(id).is_ok_and(|node| node.sense_contact_force);
        let synthesis = synthesizer.synthesize(&pairs, &geoms, &senses_force, diagnostics);
        let sensed = self
            .ray_views()
            .into_iter()
            .map(|(handle, ray)| (handle, engine.sense(&ray, &geoms, maps)))
            .collect();
        (synthesis, sensed)
    }
}

fn joint_inputs<'a>(
    joints: &'a Arena<UserJoint>,
    nodes: &Arena<SimNode>,
    node_ids: &HashMap<NodeId, Handle<SimNode>>,
) -> Vec<JointInput<'a>> {
    let side = |id: NodeId| {
        node_ids
            .get(&id)
            .and_then(|&h| nodes.get(h))
            .map(|node| JointSide {
                body: node.body,
                offset: node.offset,
            })
    };
    joints
        .iter()
        .filter_map(|(_, joint)| {
            let first = side(joint.first)?;
            let second = match joint.second {
                Some(id) => side(id)?,
                None => JointSide {
                    body: None,
                    offset: Pose::identity(),
                },
            };
            Some(JointInput {
                joint,
                first,
                second,
            })
        })
        .collect()
}

fn contact_force(geom: &GeomData, feedback: &[ContactFeedback]) -> Vector3<f64> {
    geom.feedback
        .iter()
        .filter_map(|&(slot, first)| {
            feedback.get(slot).map(|f| {
                if first {
                    f.force_first
                } else {
                    f.force_second
                }
            })
        })
        .sum()
}

/// Node poses read straight from the live world.
struct LivePoses<'a>(&'a Live);

impl PoseSource for LivePoses<'_> {
    fn node_pose(&self, node: NodeId) -> Option<NodePose> {
        let live = self.0;
        let node = live.node(node).ok()?;
        Some(NodePose {
            pose: live.world_pose(node),
            role: node.role,
            movable: node.body.is_some(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::CollisionShape;
    use crate::diagnostics::Severity;
    use approx::assert_relative_eq;

    fn world() -> WorldPhysics {
        let world = WorldPhysics::new(SimulationConfig::default());
        world.initialize().unwrap();
        world
    }

    fn floor(world: &WorldPhysics) -> NodeId {
        world
            .create_node(NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0)).fixed())
            .unwrap()
    }

    fn ball_at(world: &WorldPhysics, z: f64) -> NodeId {
        world
            .create_node(
                NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                    .at_position(Point3::new(0.0, 0.0, z)),
            )
            .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let world = WorldPhysics::default();
        assert!(!world.exists());
        assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
        assert!(matches!(
            world.create_node(NodeDescriptor::new("b", CollisionShape::sphere(1.0))),
            Err(SimError::NotInitialized)
        ));

        world.initialize().unwrap();
        let id = ball_at(&world, 1.0);
        world.initialize().unwrap();
        assert!(world.exists());
        assert_eq!(world.node_count().unwrap(), 1);
        assert!(world.node_pose(id).is_ok());

        world.finalize().unwrap();
        world.finalize().unwrap();
        assert!(!world.exists());
        assert!(matches!(world.node_pose(id), Err(SimError::NotInitialized)));
    }

    #[test]
    fn test_failed_creation_registers_nothing() {
        let world = world();
        let err = world
            .create_node(NodeDescriptor::new("bad", CollisionShape::sphere(-1.0)))
            .unwrap_err();
        assert!(matches!(err, SimError::ResourceAllocation { .. }));
        assert_eq!(world.node_count().unwrap(), 0);
    }

    #[test]
    fn test_non_positive_step_is_skipped() {
        let world = world();
        let ball = ball_at(&world, 1.0);
        world.set_step_size(0.0).unwrap();
        assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
        assert_relative_eq!(world.node_pose(ball).unwrap().position.z, 1.0);
        assert_eq!(world.time().unwrap(), 0.0);
    }

    #[test]
    fn test_gravity_change_applies_next_step() {
        let world = world();
        let ball = ball_at(&world, 10.0);
        world.step().unwrap();
        assert_relative_eq!(world.node_velocity(ball).unwrap().linear.z, -0.0981, epsilon = 1e-12);

        world.set_gravity(Vector3::zeros()).unwrap();
        world.step().unwrap();
        assert_relative_eq!(world.node_velocity(ball).unwrap().linear.z, -0.0981, epsilon = 1e-12);
    }

    #[test]
    fn test_resting_ball_bookkeeping_does_not_accumulate() {
        let world = world();
        let floor = floor(&world);
        let ball = ball_at(&world, 0.5);

        for _ in 0..3 {
            let outcome = world.step().unwrap();
            assert!(matches!(outcome, StepOutcome::Completed { contacts: 1 }));
            assert_eq!(world.node_collision_count(ball).unwrap(), 1);
            assert_eq!(world.node_contact_ids(ball).unwrap(), vec![Some(floor)]);
            assert_eq!(world.node_contact_points(floor).unwrap().len(), 1);
        }
        assert!(world.node_pose(ball).unwrap().position.z > 0.499);
    }

    #[test]
    fn test_contact_force_feedback() {
        let world = world();
        floor(&world);
        let ball = world
            .create_node(
                NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                    .with_mass(2.0)
                    .at_position(Point3::new(0.0, 0.0, 0.5))
                    .sensing_contact_force(),
            )
            .unwrap();
        world.step().unwrap();
        world.step().unwrap();
        let force = world.node_contact_force(ball).unwrap();
        assert_relative_eq!(force.z, 2.0 * 9.81, epsilon = 0.1);
    }

    #[test]
    fn test_joined_nodes_do_not_collide() {
        let world = world();
        let a = ball_at(&world, 0.0);
        let b = ball_at(&world, 0.8);
        world.set_gravity(Vector3::zeros()).unwrap();
        assert_eq!(world.check_collisions_only().unwrap(), 1);

        let joint = world.create_joint(JointDescriptor::fixed(a, b)).unwrap();
        assert_eq!(world.check_collisions_only().unwrap(), 0);
        world.remove_joint(joint).unwrap();
        assert!(matches!(
            world.remove_joint(joint),
            Err(SimError::UnknownJoint(_))
        ));
        assert_relative_eq!(world.get_collision_depth(a).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_cast_ray() {
        let world = world();
        floor(&world);
        ball_at(&world, 2.0);
        let down = world
            .cast_ray(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -10.0))
            .unwrap();
        assert_relative_eq!(down, 2.5, epsilon = 1e-9);

        let up = world
            .cast_ray(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, 3.0))
            .unwrap();
        assert_relative_eq!(up, 3.0);
    }

    #[test]
    fn test_center_of_mass() {
        let world = world();
        let a = world
            .create_node(
                NodeDescriptor::new("a", CollisionShape::sphere(0.1))
                    .with_mass(1.0)
                    .at_position(Point3::new(0.0, 0.0, 0.0)),
            )
            .unwrap();
        let b = world
            .create_node(
                NodeDescriptor::new("b", CollisionShape::sphere(0.1))
                    .with_mass(3.0)
                    .at_position(Point3::new(4.0, 0.0, 0.0)),
            )
            .unwrap();
        let com = world.get_center_of_mass(&[a, b]).unwrap();
        assert_relative_eq!(com, Vector3::new(3.0, 0.0, 0.0), epsilon = 1e-12);
        assert_eq!(world.get_center_of_mass(&[]).unwrap(), Vector3::zeros());
    }

    #[test]
    fn test_integration_failure_reaches_error_handler() {
        let world = world();
        floor(&world);
        let ball = ball_at(&world, 0.45);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let errors = Arc::clone(&errors);
            DiagnosticCallback::new(move |d| errors.lock().unwrap().push(d.severity))
        };
        world.set_error_handler(handler).unwrap();

        world.step().unwrap();
        assert_eq!(world.node_collision_count(ball).unwrap(), 1);
        let settled = world.node_pose(ball).unwrap().position.z;
        let time = world.time().unwrap();

        world.add_force(ball, Vector3::new(f64::NAN, 0.0, 0.0)).unwrap();
        assert!(matches!(world.step(), Err(SimError::Integration { .. })));
        assert_eq!(*errors.lock().unwrap(), vec![Severity::Error]);
        assert_relative_eq!(world.node_pose(ball).unwrap().position.z, settled);
        assert_eq!(world.time().unwrap(), time);
        // Records of the last successful step survive the failure.
        assert_eq!(world.node_collision_count(ball).unwrap(), 1);

        // The bad force is gone; stepping resumes.
        assert!(world.step().unwrap().is_completed());
        assert_relative_eq!(world.time().unwrap(), time + 0.01, epsilon = 1e-12);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_draw_buffer_is_published() {
        let world = WorldPhysics::new(SimulationConfig::default().with_contact_drawing());
        world.initialize().unwrap();
        floor(&world);
        ball_at(&world, 0.5);
        assert!(world.draw_items().unwrap().is_empty());
        world.step().unwrap();
        let items = world.draw_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_relative_eq!(items[0].normal.z.abs(), 1.0, epsilon = 1e-12);

        let mut config = world.config().unwrap();
        config.draw_contact_points = false;
        world.set_config(config).unwrap();
        world.step().unwrap();
        assert!(world.draw_items().unwrap().is_empty());
    }

    /// Cubes crossed edge on edge report the small edge overlap, so the
    /// correction stays gentle.
    #[test]
    fn test_crossed_boxes_report_edge_depth() {
        use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

        let world = WorldPhysics::new(SimulationConfig::default().zero_gravity());
        world.initialize().unwrap();
        let cube = || CollisionShape::box_shape(Vector3::repeat(0.5));
        world
            .create_node(
                NodeDescriptor::new("lower", cube()).fixed().at(Pose::from_position_rotation(
                    Point3::origin(),
                    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_4),
                )),
            )
            .unwrap();
        let upper = world
            .create_node(NodeDescriptor::new("upper", cube()).at(Pose::from_position_rotation(
                Point3::new(0.0, 0.0, 2.0 * FRAC_1_SQRT_2 - 0.01),
                UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_4),
            )))
            .unwrap();

        assert_relative_eq!(world.get_collision_depth(upper).unwrap(), 0.01, epsilon = 1e-6);
        world.step().unwrap();
        let twist = world.node_velocity(upper).unwrap();
        assert!(twist.linear.norm() < 0.5, "correction too strong: {twist:?}");
        assert!(twist.linear.z >= 0.0);
    }

    #[test]
    fn test_remove_node_drops_its_joints() {
        let world = world();
        let a = ball_at(&world, 0.0);
        let b = ball_at(&world, 3.0);
        let joint = world.create_joint(JointDescriptor::fixed(a, b)).unwrap();
        world.remove_node(b).unwrap();
        assert!(matches!(
            world.remove_joint(joint),
            Err(SimError::UnknownJoint(_))
        ));
        assert!(matches!(world.remove_node(b), Err(SimError::UnknownNode(_))));
        assert!(matches!(
            world.create_joint(JointDescriptor::fixed(a, a)),
            Err(SimError::InvalidConfig { .. })
        ));
    }
}
