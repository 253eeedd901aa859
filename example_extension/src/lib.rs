// Example extension: a couple of user classes registered through the
// macros, loaded by the engine through `tether_library_init`.

use tether::prelude::*;

pub const NOTIFICATION_READY: i32 = 13;

// ---------------------------------------------------------------------------
// Player: a Node subclass with exported stats and engine virtuals
// ---------------------------------------------------------------------------

#[hostclass(parent = Node, to_string = describe_self, notification = on_engine_notification)]
pub struct Player {
    #[base]
    base: ObjRef<Player>,

    #[export(default = 100, hint = PROPERTY_HINT_RANGE, hint_string = "0,100", group = "Stats")]
    health: i64,

    #[export(default = 4.5)]
    speed: f64,

    #[export(read_only)]
    score: i64,

    travelled: f64,
    ready: bool,
}

#[hostclass_impl]
impl Player {
    #[func(defaults = (10))]
    fn take_damage(&mut self, amount: i64) -> bool {
        self.health = (self.health - amount).max(0);
        if self.health == 0 {
            tlog!(LOG_INFO, "[example] {} died with score {}", self.name(), self.score);
        }
        self.health == 0
    }

    #[func]
    fn add_score(&mut self, points: i64) -> i64 {
        self.score += points;
        self.score
    }

    #[func]
    fn travelled(&self) -> f64 {
        self.travelled
    }

    #[func]
    fn is_ready(&self) -> bool {
        self.ready
    }

    #[func]
    fn clamp_health(value: i64) -> i64 {
        value.clamp(0, Self::MAX_HEALTH)
    }

    #[func(Override)]
    fn _process(&mut self, delta: f64) {
        self.travelled += self.speed * delta;
    }

    #[signal]
    fn died(score: i64) {}

    #[constant]
    const MAX_HEALTH: i64 = 100;

    #[constant(enum_name = "Team")]
    const TEAM_RED: i64 = 0;

    #[constant(enum_name = "Team")]
    const TEAM_BLUE: i64 = 1;

    fn name(&self) -> String {
        self.get_name().unwrap_or_default()
    }

    fn describe_self(&self) -> String {
        format!("Player(hp={}, score={})", self.health, self.score)
    }

    fn on_engine_notification(&mut self, what: i32) {
        if what == NOTIFICATION_READY {
            self.ready = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory: a RefCounted subclass holding plain Rust data
// ---------------------------------------------------------------------------

#[hostclass(parent = RefCounted)]
pub struct Inventory {
    #[export(default = 3)]
    capacity: i64,

    items: Vec<String>,
}

#[hostclass_impl]
impl Inventory {
    #[func]
    fn add_item(&mut self, item: String) -> bool {
        if self.items.len() as i64 >= self.capacity {
            return false;
        }
        self.items.push(item);
        true
    }

    #[func]
    fn item_count(&self) -> i64 {
        self.items.len() as i64
    }

    #[func]
    fn item(&self, index: i64) -> String {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.items.get(i))
            .cloned()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Editor tooling
// ---------------------------------------------------------------------------

#[cfg(feature = "editor")]
#[hostclass(parent = EditorPlugin)]
pub struct LevelTools;

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

pub struct ExampleLibrary;

impl ExtensionLibrary for ExampleLibrary {
    fn editor_plugins() -> &'static [&'static str] {
        #[cfg(feature = "editor")]
        {
            &["LevelTools"]
        }
        #[cfg(not(feature = "editor"))]
        {
            &[]
        }
    }

    fn on_level_init(level: InitLevel) {
        if level == InitLevel::Scene {
            tlog!(LOG_INFO, "[example] gameplay classes ready");
        }
    }
}

tether::entry!(ExampleLibrary);

#[cfg(test)]
mod tests {
    use std::ptr;
    use std::sync::Mutex;

    use super::*;
    use tether::ffi::{ConstTypePtr, TypePtr};
    use tether_test_host::LoadedLibrary;

    static LOADED: Mutex<()> = Mutex::new(());

    fn load() -> LoadedLibrary {
        let mut library = LoadedLibrary::open(tether_library_init, tether_test_host::get_proc_address)
            .expect("entry point accepts the test host");
        library.initialize(InitLevel::Scene);
        library
    }

    #[test]
    fn player_registers_its_whole_surface() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let _library = load();
        let info = tether_test_host::class_info("Player").unwrap();
        assert_eq!(info.parent, "Node");
        for method in ["take_damage", "add_score", "clamp_health", "get_health", "set_health", "get_score"] {
            assert!(info.methods.iter().any(|m| m == method), "missing {method}");
        }
        assert!(!info.methods.iter().any(|m| m == "set_score"));
        assert!(info.properties.iter().any(|p| p == "group:Stats"));
        assert!(info.properties.iter().any(|p| p == "health"));
        assert_eq!(info.signals, [("died".to_string(), 1)]);
        assert!(info.constants.contains(&("Team".to_string(), "TEAM_BLUE".to_string(), 1, false)));
    }

    #[test]
    fn gameplay_calls_reach_the_instance() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let _library = load();
        let scope = LifetimeScope::new();
        let player = Obj::<Player>::construct().unwrap();
        let r = player.obj_ref();
        r.set_name("Hero").unwrap();

        // Default argument fills in the damage.
        let dead = r.call("take_damage", &[]).unwrap().to::<bool>().unwrap();
        assert!(!dead);
        assert_eq!(player.bind(|p| p.health).unwrap(), 90);
        let dead = r.call("take_damage", &[Variant::from_value(&200i64).unwrap()]).unwrap();
        assert!(dead.to::<bool>().unwrap());

        assert_eq!(r.call("clamp_health", &[Variant::from_value(&250i64).unwrap()]).unwrap().to::<i64>().unwrap(), 100);
        r.call("add_score", &[Variant::from_value(&7i64).unwrap()]).unwrap();
        assert_eq!(r.to_variant().unwrap().stringify().unwrap(), "Player(hp=0, score=7)");

        player.free().unwrap();
        scope.end();
    }

    #[test]
    fn engine_virtuals_and_notifications_dispatch() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let _library = load();
        let scope = LifetimeScope::new();
        let player = Obj::<Player>::construct().unwrap();
        let id = player.obj_ref().instance_id();

        let delta = 2.0f64;
        let args = [&delta as *const f64 as ConstTypePtr];
        let mut ret = 0u64;
        assert!(tether_test_host::call_virtual(id, "_process", &args, &mut ret as *mut u64 as TypePtr));
        assert!(tether_test_host::call_virtual(id, "_process", &args, ptr::null_mut()));
        assert_eq!(player.bind(|p| p.travelled).unwrap(), 18.0);
        assert_eq!(tether_test_host::virtual_lookups("Player", "_process"), 1);
        assert!(!tether_test_host::call_virtual(id, "_physics_process", &args, ptr::null_mut()));

        tether_test_host::notify(id, NOTIFICATION_READY);
        assert!(player.bind(|p| p.ready).unwrap());

        player.free().unwrap();
        scope.end();
    }

    #[test]
    fn inventory_is_released_with_its_last_reference() {
        let _guard = LOADED.lock().unwrap_or_else(|e| e.into_inner());
        let _library = load();
        let scope = LifetimeScope::new();
        let inventory = Obj::<Inventory>::construct().unwrap();
        let r = inventory.obj_ref();
        for item in ["sword", "shield", "potion", "map"] {
            r.call("add_item", &[Variant::from_value(item).unwrap()]).unwrap();
        }
        assert_eq!(inventory.bind(|inv| inv.items.len()).unwrap(), 3);
        assert_eq!(r.call("item", &[Variant::from_value(&1i64).unwrap()]).unwrap().to::<String>().unwrap(), "shield");
        assert_eq!(r.get_reference_count().unwrap(), 1);

        let id = r.instance_id();
        scope.end();
        assert!(!tether_test_host::is_live(id));
    }
}
