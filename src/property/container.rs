//! Named properties and the ordered container that tracks their sync state.

use heapless::Vec;

use super::value::{PropertyValue, ValueKind};
use crate::error::PropertyError;

/// Who may write a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Permission {
    /// Device writes, cloud only reads.
    Read,
    /// Cloud writes, device never publishes it.
    Write,
    /// Both sides write.
    ReadWrite,
}

impl Permission {
    pub fn readable_by_cloud(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable_by_cloud(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Conflict resolution applied while decoding the last-values sync reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncPolicy {
    /// Keep the local value if it was set after the cloud value.
    #[default]
    DeviceWins,
    /// Always take the cloud value.
    CloudWins,
}

/// When a readable property is published.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishPolicy {
    /// On every local change. For numeric values only changes of at least
    /// `min_delta` relative to the last published value count.
    OnChange { min_delta: f32 },
    /// Every `seconds`, changed or not.
    Every { seconds: u32 },
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self::OnChange { min_delta: 0.0 }
    }
}

/// Called after the cloud wrote a property.
pub type UpdateCallback = fn(&Property);

/// A named, typed value synchronized with the cloud.
///
/// Built with a small builder at startup:
///
/// ```ignore
/// let setpoint = Property::new("BrewBoilerSP", 212)
///     .read_write()
///     .on_update(on_setpoint_change);
/// ```
#[derive(Debug, Clone)]
pub struct Property {
    name: &'static str,
    value: PropertyValue,
    permission: Permission,
    sync_policy: SyncPolicy,
    publish_policy: PublishPolicy,
    on_update: Option<UpdateCallback>,
    dirty: bool,
    in_flight: bool,
    local_change_pending: bool,
    updated_by_cloud: bool,
    local_timestamp: u32,
    cloud_timestamp: u32,
    last_published_at: u32,
    published_number: Option<f64>,
}

impl Property {
    /// A read-only property, published on change.
    pub fn new(name: &'static str, value: impl Into<PropertyValue>) -> Self {
        Self {
            name,
            value: value.into(),
            permission: Permission::Read,
            sync_policy: SyncPolicy::DeviceWins,
            publish_policy: PublishPolicy::default(),
            on_update: None,
            dirty: true,
            in_flight: false,
            local_change_pending: false,
            updated_by_cloud: false,
            local_timestamp: 0,
            cloud_timestamp: 0,
            last_published_at: 0,
            published_number: None,
        }
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn read_write(self) -> Self {
        self.permission(Permission::ReadWrite)
    }

    pub fn write_only(self) -> Self {
        self.permission(Permission::Write)
    }

    pub fn on_sync(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn on_update(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn publish_on_change(mut self, min_delta: f32) -> Self {
        self.publish_policy = PublishPolicy::OnChange { min_delta };
        self
    }

    pub fn publish_every(mut self, seconds: u32) -> Self {
        self.publish_policy = PublishPolicy::Every { seconds };
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn access(&self) -> Permission {
        self.permission
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Posix time of the last local change, 0 if never stamped.
    pub fn local_timestamp(&self) -> u32 {
        self.local_timestamp
    }

    /// Posix time carried by the last applied cloud value, 0 if none.
    pub fn cloud_timestamp(&self) -> u32 {
        self.cloud_timestamp
    }

    fn set_local(&mut self, value: PropertyValue) -> Result<(), PropertyError> {
        if value.kind() != self.value.kind() {
            return Err(PropertyError::TypeMismatch);
        }
        if value == self.value {
            return Ok(());
        }
        let publish = match self.publish_policy {
            PublishPolicy::OnChange { min_delta } if min_delta > 0.0 => {
                match (value.as_number(), self.published_number) {
                    (Some(new), Some(old)) => {
                        let diff = new - old;
                        (if diff < 0.0 { -diff } else { diff }) >= min_delta as f64
                    }
                    _ => true,
                }
            }
            PublishPolicy::OnChange { .. } => true,
            PublishPolicy::Every { .. } => false,
        };
        self.value = value;
        self.local_change_pending = true;
        if publish {
            self.dirty = true;
        }
        Ok(())
    }

    fn apply_cloud(&mut self, value: PropertyValue, timestamp: u32) {
        self.published_number = value.as_number();
        self.value = value;
        self.cloud_timestamp = timestamp;
        self.dirty = false;
        self.local_change_pending = false;
        self.updated_by_cloud = true;
    }
}

/// An insertion-ordered set of properties with a resume cursor for encoding.
///
/// The cursor is the index of the next property the encoder looks at; `0`
/// doubles as "wrapped to start".
#[derive(Debug)]
pub struct PropertyContainer<const N: usize> {
    properties: Vec<Property, N>,
    cursor: usize,
    pending_cursor: Option<usize>,
}

impl<const N: usize> Default for PropertyContainer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PropertyContainer<N> {
    pub const fn new() -> Self {
        Self {
            properties: Vec::new(),
            cursor: 0,
            pending_cursor: None,
        }
    }

    /// Adds a property. Names are unique per container.
    pub fn register(&mut self, property: Property) -> Result<usize, PropertyError> {
        if self.index_of(property.name).is_some() {
            return Err(PropertyError::DuplicateName);
        }
        self.properties
            .push(property)
            .map_err(|_| PropertyError::ContainerFull)?;
        Ok(self.properties.len() - 1)
    }

    /// Registers a declarative list of properties in order.
    pub fn register_all(
        &mut self,
        properties: impl IntoIterator<Item = Property>,
    ) -> Result<(), PropertyError> {
        for property in properties {
            self.register(property)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.get(name).map(Property::value)
    }

    /// Local write. Marks the property for publishing according to its policy.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), PropertyError> {
        let index = self.index_of(name).ok_or(PropertyError::UnknownProperty)?;
        self.properties[index].set_local(value.into())
    }

    /// Forces a property to be published on the next encode.
    pub fn mark_dirty(&mut self, name: &str) -> Result<(), PropertyError> {
        let index = self.index_of(name).ok_or(PropertyError::UnknownProperty)?;
        self.properties[index].dirty = true;
        Ok(())
    }

    /// Forgets pending changes; used for properties the cloud does not expect
    /// until they actually change.
    pub(crate) fn clear_dirty(&mut self) {
        for p in self.properties.iter_mut() {
            p.dirty = false;
            p.local_change_pending = false;
        }
    }

    pub fn has_dirty(&self) -> bool {
        self.properties
            .iter()
            .any(|p| p.dirty && p.permission.readable_by_cloud())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Stamps local changes made since the last call with `posix_time`.
    pub fn stamp_local_changes(&mut self, posix_time: u32) {
        for p in self.properties.iter_mut().filter(|p| p.local_change_pending) {
            p.local_timestamp = posix_time;
            p.local_change_pending = false;
        }
    }

    /// Marks periodic properties whose interval elapsed.
    pub fn schedule_periodic(&mut self, posix_time: u32) {
        for p in self.properties.iter_mut() {
            if let PublishPolicy::Every { seconds } = p.publish_policy
                && p.permission.readable_by_cloud()
                && posix_time >= p.last_published_at.saturating_add(seconds)
            {
                p.dirty = true;
            }
        }
    }

    /// Hands every property written by the cloud since the last call to `f`,
    /// after running its registered update callback.
    pub fn drain_cloud_updates(&mut self, mut f: impl FnMut(&Property)) {
        for p in self.properties.iter_mut().filter(|p| p.updated_by_cloud) {
            p.updated_by_cloud = false;
            if let Some(callback) = p.on_update {
                callback(p);
            }
            f(p);
        }
    }

    pub(crate) fn at(&self, index: usize) -> &Property {
        &self.properties[index]
    }

    pub(crate) fn apply_cloud(&mut self, index: usize, value: PropertyValue, timestamp: u32) {
        self.properties[index].apply_cloud(value, timestamp);
    }

    pub(crate) fn mark_dirty_at(&mut self, index: usize) {
        self.properties[index].dirty = true;
    }

    pub(crate) fn drop_change_at(&mut self, index: usize) {
        self.properties[index].dirty = false;
    }

    pub(crate) fn mark_in_flight(&mut self, index: usize) {
        self.properties[index].in_flight = true;
    }

    pub(crate) fn set_pending_cursor(&mut self, cursor: usize) {
        self.pending_cursor = Some(cursor);
    }

    /// The last encoded batch is queued for transmission: clear its dirty flags
    /// and move the cursor past it.
    pub fn commit(&mut self, posix_time: u32) {
        for p in self.properties.iter_mut().filter(|p| p.in_flight) {
            p.in_flight = false;
            p.dirty = false;
            p.last_published_at = posix_time;
            p.published_number = p.value.as_number();
        }
        if let Some(cursor) = self.pending_cursor.take() {
            self.cursor = if cursor < self.properties.len() { cursor } else { 0 };
        }
    }

    /// The last encoded batch was not sent; its properties stay dirty.
    pub fn abort(&mut self) {
        for p in self.properties.iter_mut() {
            p.in_flight = false;
        }
        self.pending_cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> PropertyContainer<8> {
        let mut c = PropertyContainer::new();
        c.register_all([
            Property::new("temp", 20.5f32).publish_on_change(1.0),
            Property::new("pump", false).read_write(),
            Property::new("state", PropertyValue::text("idle").unwrap()).publish_every(10),
        ])
        .unwrap();
        c
    }

    fn settle(c: &mut PropertyContainer<8>) {
        for i in 0..c.len() {
            c.mark_in_flight(i);
        }
        c.commit(0);
    }

    #[test]
    fn names_are_unique() {
        let mut c = container();
        assert_eq!(
            c.register(Property::new("pump", true)),
            Err(PropertyError::DuplicateName)
        );
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn container_reports_full() {
        let mut c: PropertyContainer<1> = PropertyContainer::new();
        c.register(Property::new("a", 1)).unwrap();
        assert_eq!(
            c.register(Property::new("b", 1)),
            Err(PropertyError::ContainerFull)
        );
    }

    #[test]
    fn set_checks_type_and_name() {
        let mut c = container();
        assert_eq!(c.set("pump", 3), Err(PropertyError::TypeMismatch));
        assert_eq!(c.set("nope", 3), Err(PropertyError::UnknownProperty));
        c.set("pump", true).unwrap();
        assert_eq!(c.value("pump"), Some(&PropertyValue::Bool(true)));
    }

    #[test]
    fn min_delta_is_relative_to_published_value() {
        let mut c = container();
        settle(&mut c);
        c.set("temp", 21.0f32).unwrap();
        assert!(!c.get("temp").unwrap().is_dirty());
        c.set("temp", 21.4f32).unwrap();
        assert!(!c.get("temp").unwrap().is_dirty());
        c.set("temp", 21.6f32).unwrap();
        assert!(c.get("temp").unwrap().is_dirty());
    }

    #[test]
    fn periodic_properties_become_dirty_after_interval() {
        let mut c = container();
        settle(&mut c);
        c.set("state", PropertyValue::text("brew").unwrap()).unwrap();
        assert!(!c.get("state").unwrap().is_dirty());
        c.schedule_periodic(9);
        assert!(!c.get("state").unwrap().is_dirty());
        c.schedule_periodic(10);
        assert!(c.get("state").unwrap().is_dirty());
    }

    #[test]
    fn local_changes_are_stamped_once() {
        let mut c = container();
        c.set("pump", true).unwrap();
        c.stamp_local_changes(10);
        c.stamp_local_changes(50);
        assert_eq!(c.get("pump").unwrap().local_timestamp(), 10);
    }

    #[test]
    fn abort_keeps_dirty_and_cursor() {
        let mut c = container();
        c.mark_in_flight(0);
        c.set_pending_cursor(1);
        c.abort();
        assert!(c.get("temp").unwrap().is_dirty());
        assert_eq!(c.cursor(), 0);
        c.mark_in_flight(0);
        c.set_pending_cursor(1);
        c.commit(5);
        assert!(!c.get("temp").unwrap().is_dirty());
        assert_eq!(c.cursor(), 1);
    }

    #[test]
    fn cloud_updates_run_callbacks_once() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn on_pump(_: &Property) {
            CALLS.fetch_add(1, Ordering::Relaxed);
        }

        let mut c: PropertyContainer<2> = PropertyContainer::new();
        c.register(Property::new("pump", false).read_write().on_update(on_pump))
            .unwrap();
        c.apply_cloud(0, PropertyValue::Bool(true), 7);
        let mut seen = 0;
        c.drain_cloud_updates(|p| {
            assert_eq!(p.name(), "pump");
            seen += 1;
        });
        c.drain_cloud_updates(|_| seen += 1);
        assert_eq!(seen, 1);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        assert!(!c.get("pump").unwrap().is_dirty());
        assert_eq!(c.get("pump").unwrap().cloud_timestamp(), 7);
    }
}
