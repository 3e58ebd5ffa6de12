//! User deactivation routed through an ordered registry of strategies.

use std::sync::Arc;

use log::{debug, info};

use crate::booking::AppointmentBook;
use crate::error::{ClinicError, Result};
use crate::models::{Appointment, User, UserType};
use crate::storage::ClinicStore;

pub trait DeactivationStrategy: Send + Sync {
    fn can_handle(&self, user_type: UserType) -> bool;
    fn deactivate(&self, user_id: &str) -> Result<()>;
}

fn load_user(store: &dyn ClinicStore, user_id: &str, expected: UserType) -> Result<User> {
    let user = store
        .get_user(user_id)?
        .ok_or_else(|| ClinicError::not_found("User", user_id))?;
    if user.user_type != expected {
        return Err(ClinicError::ValidationFailed(format!(
            "User {} is a {}, not a {}",
            user_id,
            user.user_type.name(),
            expected.name()
        )));
    }
    Ok(user)
}

/// Cancel upcoming appointments that have not started yet. An appointment
/// with a live session is left for the session to close.
fn cancel_unstarted(
    store: &dyn ClinicStore,
    book: &AppointmentBook,
    upcoming: &[Appointment],
) -> Result<usize> {
    let mut cancelled = 0;
    for appointment in upcoming {
        if store
            .get_session_by_appointment(&appointment.appointment_id)?
            .is_some()
        {
            debug!(
                "Appointment {} already has a session, left in place",
                appointment.appointment_id
            );
            continue;
        }
        book.cancel(&appointment.appointment_id)?;
        cancelled += 1;
    }
    Ok(cancelled)
}

/// Deactivates a doctor and cancels their upcoming appointments, which
/// also makes every slot unavailable from then on.
pub struct DoctorDeactivation {
    store: Arc<dyn ClinicStore>,
    book: AppointmentBook,
}

impl DoctorDeactivation {
    pub fn new(store: Arc<dyn ClinicStore>, book: AppointmentBook) -> Self {
        Self { store, book }
    }
}

impl DeactivationStrategy for DoctorDeactivation {
    fn can_handle(&self, user_type: UserType) -> bool {
        user_type == UserType::Doctor
    }

    fn deactivate(&self, user_id: &str) -> Result<()> {
        load_user(self.store.as_ref(), user_id, UserType::Doctor)?;
        self.store.set_user_active(user_id, false)?;

        let upcoming = self.book.upcoming_for_doctor(user_id)?;
        let cancelled = cancel_unstarted(self.store.as_ref(), &self.book, &upcoming)?;
        info!(
            "Doctor {} deactivated, {} upcoming appointment(s) cancelled",
            user_id, cancelled
        );
        Ok(())
    }
}

/// Deactivates a patient and cancels their upcoming appointments.
pub struct PatientDeactivation {
    store: Arc<dyn ClinicStore>,
    book: AppointmentBook,
}

impl PatientDeactivation {
    pub fn new(store: Arc<dyn ClinicStore>, book: AppointmentBook) -> Self {
        Self { store, book }
    }
}

impl DeactivationStrategy for PatientDeactivation {
    fn can_handle(&self, user_type: UserType) -> bool {
        user_type == UserType::Patient
    }

    fn deactivate(&self, user_id: &str) -> Result<()> {
        load_user(self.store.as_ref(), user_id, UserType::Patient)?;
        self.store.set_user_active(user_id, false)?;

        let upcoming = self.book.upcoming_for_patient(user_id)?;
        let cancelled = cancel_unstarted(self.store.as_ref(), &self.book, &upcoming)?;
        info!(
            "Patient {} deactivated, {} upcoming appointment(s) cancelled",
            user_id, cancelled
        );
        Ok(())
    }
}

pub struct AdminDeactivation {
    store: Arc<dyn ClinicStore>,
}

impl AdminDeactivation {
    pub fn new(store: Arc<dyn ClinicStore>) -> Self {
        Self { store }
    }
}

impl DeactivationStrategy for AdminDeactivation {
    fn can_handle(&self, user_type: UserType) -> bool {
        user_type == UserType::Admin
    }

    fn deactivate(&self, user_id: &str) -> Result<()> {
        load_user(self.store.as_ref(), user_id, UserType::Admin)?;
        self.store.set_user_active(user_id, false)?;
        info!("Admin {user_id} deactivated");
        Ok(())
    }
}

/// Strategies are tried in registration order; the first that can handle
/// the user type wins.
#[derive(Default)]
pub struct DeactivationRegistry {
    strategies: Vec<Box<dyn DeactivationStrategy>>,
}

impl DeactivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the doctor, patient and admin strategies.
    pub fn with_defaults(store: Arc<dyn ClinicStore>, book: AppointmentBook) -> Self {
        let mut registry = Self::new();
        registry.register(DoctorDeactivation::new(store.clone(), book.clone()));
        registry.register(PatientDeactivation::new(store.clone(), book));
        registry.register(AdminDeactivation::new(store));
        registry
    }

    pub fn register(&mut self, strategy: impl DeactivationStrategy + 'static) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn deactivate(&self, user_type: UserType, user_id: &str) -> Result<()> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.can_handle(user_type))
            .ok_or_else(|| {
                ClinicError::NotSupported(format!(
                    "No deactivation strategy for {}",
                    user_type.name()
                ))
            })?;
        strategy.deactivate(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityCalculator;
    use crate::calendar::ScheduleWindow;
    use crate::clock::FixedClock;
    use crate::models::{AppointmentStatus, Session};
    use crate::storage::InMemoryStore;
    use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monday_at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, AppointmentBook, AvailabilityCalculator, User) {
        let store = Arc::new(InMemoryStore::new());
        let doctor = User::new("Dr. Leaving".into(), UserType::Doctor).unwrap();
        store.insert_user(&doctor).unwrap();
        let mut schedule = store
            .get_doctor_weekly_schedule(&doctor.user_id)
            .unwrap()
            .unwrap();
        schedule
            .add_window(
                ScheduleWindow::new(
                    Weekday::Mon,
                    NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                )
                .unwrap(),
            )
            .unwrap();
        store
            .save_doctor_weekly_schedule(&doctor.user_id, &schedule)
            .unwrap();

        let availability = AvailabilityCalculator::new(store.clone(), Duration::minutes(30));
        let clock = Arc::new(FixedClock::new(monday_at(8)));
        let book = AppointmentBook::new(store.clone(), availability.clone(), clock);
        (store, book, availability, doctor)
    }

    #[test]
    fn doctor_deactivation_cancels_upcoming_and_blocks_booking() {
        let (store, book, availability, doctor) = setup();
        let first = book.book(&doctor.user_id, "p1", monday_at(10), None).unwrap();
        let second = book.book(&doctor.user_id, "p2", monday_at(11), None).unwrap();

        let registry = DeactivationRegistry::with_defaults(store.clone(), book.clone());
        registry.deactivate(UserType::Doctor, &doctor.user_id).unwrap();

        assert!(!store.get_user(&doctor.user_id).unwrap().unwrap().is_active);
        for id in [&first, &second] {
            assert_eq!(book.get(id).unwrap().status, AppointmentStatus::Cancelled);
        }
        assert!(!availability.is_available(&doctor.user_id, monday_at(12)).unwrap());
    }

    #[test]
    fn doctor_deactivation_leaves_started_appointment_and_cancels_the_rest() {
        let (store, book, _, doctor) = setup();
        let started = book.book(&doctor.user_id, "p1", monday_at(10), None).unwrap();
        let later = book.book(&doctor.user_id, "p2", monday_at(11), None).unwrap();
        let session = Session::start(&book.get(&started).unwrap(), monday_at(9)).unwrap();
        store.insert_session(&session).unwrap();

        let registry = DeactivationRegistry::with_defaults(store.clone(), book.clone());
        registry.deactivate(UserType::Doctor, &doctor.user_id).unwrap();

        assert!(!store.get_user(&doctor.user_id).unwrap().unwrap().is_active);
        assert_eq!(book.get(&started).unwrap().status, AppointmentStatus::Scheduled);
        assert_eq!(book.get(&later).unwrap().status, AppointmentStatus::Cancelled);
    }

    #[test]
    fn patient_deactivation_cancels_only_their_appointments() {
        let (store, book, _, doctor) = setup();
        let patient = User::new("Pat".into(), UserType::Patient).unwrap();
        store.insert_user(&patient).unwrap();
        let theirs = book.book(&doctor.user_id, &patient.user_id, monday_at(10), None).unwrap();
        let other = book.book(&doctor.user_id, "someone", monday_at(11), None).unwrap();

        let registry = DeactivationRegistry::with_defaults(store.clone(), book.clone());
        registry.deactivate(UserType::Patient, &patient.user_id).unwrap();

        assert_eq!(book.get(&theirs).unwrap().status, AppointmentStatus::Cancelled);
        assert_eq!(book.get(&other).unwrap().status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn admin_and_mismatched_or_unknown_users() {
        let (store, book, _, doctor) = setup();
        let admin = User::new("Root".into(), UserType::Admin).unwrap();
        store.insert_user(&admin).unwrap();
        let registry = DeactivationRegistry::with_defaults(store.clone(), book);

        registry.deactivate(UserType::Admin, &admin.user_id).unwrap();
        assert!(!store.get_user(&admin.user_id).unwrap().unwrap().is_active);

        assert!(matches!(
            registry.deactivate(UserType::Admin, &doctor.user_id),
            Err(ClinicError::ValidationFailed(_))
        ));
        assert!(matches!(
            registry.deactivate(UserType::Patient, "ghost"),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn no_matching_strategy_is_not_supported() {
        let (store, _, _, _) = setup();
        let mut registry = DeactivationRegistry::new();
        assert!(registry.is_empty());
        registry.register(AdminDeactivation::new(store));
        assert!(matches!(
            registry.deactivate(UserType::Doctor, "anyone"),
            Err(ClinicError::NotSupported(_))
        ));
    }

    struct Counting {
        hits: Arc<AtomicUsize>,
    }

    impl DeactivationStrategy for Counting {
        fn can_handle(&self, _: UserType) -> bool {
            true
        }

        fn deactivate(&self, _: &str) -> Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn first_registered_match_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut registry = DeactivationRegistry::new();
        registry.register(Counting { hits: first.clone() });
        registry.register(Counting { hits: second.clone() });

        registry.deactivate(UserType::Patient, "p").unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);
    }
}
