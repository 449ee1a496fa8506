/*!
# SyncRun DevKit - Fixtures et doublures pour tester le moteur de synchronisation

Bibliothèque facilitant les tests du kernel avec:
- Builders d'assets, devices et notifications au format de la source
- Source externe scriptée (succès / pannes programmés, appels enregistrés)
- Graphe à pannes injectables
- Harness câblant les collaborateurs mémoire sur une topologie semée
*/

pub mod fault_injection;
pub mod fixtures;
pub mod stub_source;
pub mod test_utils;

pub use fault_injection::FaultyGraph;
pub use fixtures::{notification, AssetBuilder, DeviceBuilder};
pub use stub_source::StubSource;
pub use test_utils::TestHarness;
