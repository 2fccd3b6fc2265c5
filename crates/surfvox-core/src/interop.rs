//! Registry of objects shared between the graphics and compute sides.
//!
//! Every shared object is owned by exactly one side at a time. Ownership moves
//! in whole batches: [`InteropRegistry::acquire_all`] hands every registered
//! object to compute and [`InteropRegistry::release`] hands them all back.

use crate::error::{Result, SurfvoxError};

/// Identifier of a shared object, stable for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedObjectId(pub u32);

/// How the compute side may touch a shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
}

/// Which side currently owns a shared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    #[default]
    Graphics,
    Compute,
}

/// Handle of a registered mesh, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub usize);

/// A registered mesh: its two read-only shared objects and triangle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshEntry {
    pub vertices: SharedObjectId,
    pub indices: SharedObjectId,
    pub triangle_count: u32,
}

#[derive(Debug)]
struct SharedObject<O> {
    object: O,
    access: Access,
    owner: Owner,
}

/// Proof that compute currently holds every registered object.
///
/// Must be handed back to [`InteropRegistry::release`].
#[must_use = "a lease must be released to return ownership to graphics"]
#[derive(Debug)]
pub struct ComputeLease {
    epoch: u64,
    objects: Vec<SharedObjectId>,
}

impl ComputeLease {
    /// Objects covered by this lease, in registration order.
    pub fn objects(&self) -> &[SharedObjectId] {
        &self.objects
    }
}

/// Bounded, append-only registry of shared objects.
///
/// Slot 0 is reserved for the volume; meshes follow in pairs.
#[derive(Debug)]
pub struct InteropRegistry<O> {
    objects: Vec<SharedObject<O>>,
    volume: Option<SharedObjectId>,
    meshes: Vec<MeshEntry>,
    max_meshes: usize,
    epoch: u64,
    held: bool,
}

impl<O> InteropRegistry<O> {
    /// Creates an empty registry that accepts up to `max_meshes` meshes.
    pub fn new(max_meshes: usize) -> Self {
        Self {
            objects: Vec::with_capacity(1 + 2 * max_meshes),
            volume: None,
            meshes: Vec::with_capacity(max_meshes),
            max_meshes,
            epoch: 0,
            held: false,
        }
    }

    fn push(&mut self, object: O, access: Access) -> SharedObjectId {
        let id = SharedObjectId(self.objects.len() as u32);
        self.objects.push(SharedObject {
            object,
            access,
            owner: Owner::Graphics,
        });
        id
    }

    fn ensure_released(&self) -> Result<()> {
        if self.held {
            Err(SurfvoxError::AlreadyAcquired)
        } else {
            Ok(())
        }
    }

    /// Registers the write-only volume object. Only one volume is allowed.
    pub fn register_volume(&mut self, object: O) -> Result<SharedObjectId> {
        self.ensure_released()?;
        if self.volume.is_some() {
            return Err(SurfvoxError::VolumeAlreadyRegistered);
        }
        let id = self.push(object, Access::WriteOnly);
        self.volume = Some(id);
        Ok(id)
    }

    /// Registers a mesh as two read-only objects.
    pub fn register_mesh(&mut self, vertices: O, indices: O, triangle_count: u32) -> Result<MeshHandle> {
        self.ensure_released()?;
        if self.meshes.len() >= self.max_meshes {
            return Err(SurfvoxError::MeshCapacityExceeded {
                max: self.max_meshes,
            });
        }
        let vertices = self.push(vertices, Access::ReadOnly);
        let indices = self.push(indices, Access::ReadOnly);
        let handle = MeshHandle(self.meshes.len());
        self.meshes.push(MeshEntry {
            vertices,
            indices,
            triangle_count,
        });
        Ok(handle)
    }

    /// Transfers every registered object to compute in one batch.
    pub fn acquire_all(&mut self) -> Result<ComputeLease> {
        self.ensure_released()?;
        self.held = true;
        self.epoch += 1;
        for shared in &mut self.objects {
            shared.owner = Owner::Compute;
        }
        Ok(ComputeLease {
            epoch: self.epoch,
            objects: self.ids().collect(),
        })
    }

    /// Returns every object covered by `lease` to graphics.
    pub fn release(&mut self, lease: ComputeLease) -> Result<()> {
        if !self.held || lease.epoch != self.epoch {
            return Err(SurfvoxError::NotAcquired);
        }
        for shared in &mut self.objects {
            shared.owner = Owner::Graphics;
        }
        self.held = false;
        Ok(())
    }

    /// Whether compute currently holds the objects.
    pub fn is_acquired(&self) -> bool {
        self.held
    }

    pub fn get(&self, id: SharedObjectId) -> Option<&O> {
        self.objects.get(id.0 as usize).map(|s| &s.object)
    }

    pub fn access(&self, id: SharedObjectId) -> Option<Access> {
        self.objects.get(id.0 as usize).map(|s| s.access)
    }

    pub fn owner(&self, id: SharedObjectId) -> Option<Owner> {
        self.objects.get(id.0 as usize).map(|s| s.owner)
    }

    /// The registered volume object, if any.
    pub fn volume(&self) -> Option<&O> {
        self.volume.and_then(|id| self.get(id))
    }

    pub fn meshes(&self) -> &[MeshEntry] {
        &self.meshes
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&MeshEntry> {
        self.meshes.get(handle.0)
    }

    pub fn max_meshes(&self) -> usize {
        self.max_meshes
    }

    /// All registered object ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = SharedObjectId> + '_ {
        (0..self.objects.len()).map(|i| SharedObjectId(i as u32))
    }

    /// All registered objects in registration order.
    pub fn objects(&self) -> impl Iterator<Item = &O> + '_ {
        self.objects.iter().map(|s| &s.object)
    }

    /// Returns the number of registered shared objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
