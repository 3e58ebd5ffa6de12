//! Read-only decision on whether a doctor can be booked at a given time.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;

use crate::error::{ClinicError, Result};
use crate::storage::ClinicStore;

/// Outcome of checking one candidate slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCheck {
    Available,
    /// The doctor has been deactivated.
    DoctorInactive,
    /// No weekly window covers the slot, including days with no windows at all.
    OutsideSchedule,
    /// Another non-cancelled appointment starts within one slot length.
    Taken { appointment_id: String },
}

impl SlotCheck {
    pub fn is_available(&self) -> bool {
        matches!(self, SlotCheck::Available)
    }
}

#[derive(Clone)]
pub struct AvailabilityCalculator {
    store: Arc<dyn ClinicStore>,
    slot_length: Duration,
}

impl AvailabilityCalculator {
    pub fn new(store: Arc<dyn ClinicStore>, slot_length: Duration) -> Self {
        Self { store, slot_length }
    }

    pub fn slot_length(&self) -> Duration {
        self.slot_length
    }

    pub fn is_available(&self, doctor_id: &str, at: NaiveDateTime) -> Result<bool> {
        Ok(self.check_slot(doctor_id, at, None)?.is_available())
    }

    /// Check a candidate slot. `ignore` skips one appointment, so a
    /// reschedule does not collide with the booking it replaces.
    pub fn check_slot(
        &self,
        doctor_id: &str,
        at: NaiveDateTime,
        ignore: Option<&str>,
    ) -> Result<SlotCheck> {
        let schedule = self
            .store
            .get_doctor_weekly_schedule(doctor_id)?
            .ok_or_else(|| ClinicError::not_found("Doctor", doctor_id))?;

        let active = self
            .store
            .get_user(doctor_id)?
            .map(|user| user.is_active)
            .unwrap_or(false);
        if !active {
            debug!("Doctor {doctor_id} is inactive");
            return Ok(SlotCheck::DoctorInactive);
        }

        if !schedule.covers(at) {
            debug!(
                "No window for doctor {} covers {}",
                doctor_id,
                at.format("%a %Y-%m-%d %H:%M")
            );
            return Ok(SlotCheck::OutsideSchedule);
        }

        let clash = self
            .store
            .get_appointments_by_doctor(doctor_id)?
            .into_iter()
            .filter(|apt| Some(apt.appointment_id.as_str()) != ignore)
            .find(|apt| apt.holds_slot() && apt.overlaps_with(at, self.slot_length));

        if let Some(apt) = clash {
            debug!(
                "Doctor {} slot {} clashes with appointment {}",
                doctor_id,
                at.format("%Y-%m-%d %H:%M"),
                apt.appointment_id
            );
            return Ok(SlotCheck::Taken {
                appointment_id: apt.appointment_id,
            });
        }

        Ok(SlotCheck::Available)
    }

    /// All bookable slot starts on `date` that are still after `now`.
    pub fn available_slots(
        &self,
        doctor_id: &str,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        let schedule = self
            .store
            .get_doctor_weekly_schedule(doctor_id)?
            .ok_or_else(|| ClinicError::not_found("Doctor", doctor_id))?;

        let mut slots = Vec::new();
        for start in schedule.slot_starts_on(date, self.slot_length) {
            if start > now && self.check_slot(doctor_id, start, None)?.is_available() {
                slots.push(start);
            }
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ScheduleWindow;
    use crate::models::{Appointment, AppointmentStatus, User, UserType};
    use crate::storage::InMemoryStore;
    use chrono::{NaiveTime, Weekday};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday_at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap().and_time(t(h, m))
    }

    fn setup() -> (Arc<InMemoryStore>, AvailabilityCalculator, String) {
        let store = Arc::new(InMemoryStore::new());
        let doctor = User::new("Dr. Avail".into(), UserType::Doctor).unwrap();
        store.insert_user(&doctor).unwrap();

        let mut schedule = store
            .get_doctor_weekly_schedule(&doctor.user_id)
            .unwrap()
            .unwrap();
        schedule
            .add_window(ScheduleWindow::new(Weekday::Mon, t(9, 0), t(12, 0)).unwrap())
            .unwrap();
        store
            .save_doctor_weekly_schedule(&doctor.user_id, &schedule)
            .unwrap();

        let calc = AvailabilityCalculator::new(store.clone(), Duration::minutes(30));
        (store, calc, doctor.user_id)
    }

    fn book(store: &InMemoryStore, doctor_id: &str, at: NaiveDateTime) -> Appointment {
        let apt = Appointment::new(doctor_id.into(), "pat".into(), at, None, monday_at(0, 0)).unwrap();
        store.insert_appointment(&apt, Duration::minutes(30)).unwrap();
        apt
    }

    #[test]
    fn unknown_doctor_is_not_found() {
        let (_, calc, _) = setup();
        let err = calc.is_available("ghost", monday_at(10, 0)).unwrap_err();
        assert!(matches!(err, ClinicError::NotFound { .. }));
    }

    #[test]
    fn fails_closed_outside_windows() {
        let (_, calc, doctor) = setup();
        assert!(calc.is_available(&doctor, monday_at(10, 0)).unwrap());
        assert!(!calc.is_available(&doctor, monday_at(13, 0)).unwrap());
        assert!(!calc.is_available(&doctor, monday_at(8, 30)).unwrap());

        let tuesday = monday_at(10, 0) + Duration::days(1);
        assert_eq!(
            calc.check_slot(&doctor, tuesday, None).unwrap(),
            SlotCheck::OutsideSchedule
        );
    }

    #[test]
    fn start_near_window_end_is_available() {
        let (_, calc, doctor) = setup();
        assert!(calc.is_available(&doctor, monday_at(11, 45)).unwrap());
        assert!(!calc.is_available(&doctor, monday_at(12, 0)).unwrap());
    }

    #[test]
    fn doctor_without_any_window_is_never_available() {
        let store = Arc::new(InMemoryStore::new());
        let doctor = User::new("Dr. Empty".into(), UserType::Doctor).unwrap();
        store.insert_user(&doctor).unwrap();
        let calc = AvailabilityCalculator::new(store, Duration::minutes(30));
        assert!(!calc.is_available(&doctor.user_id, monday_at(10, 0)).unwrap());
    }

    #[test]
    fn existing_booking_blocks_nearby_starts() {
        let (store, calc, doctor) = setup();
        let apt = book(&store, &doctor, monday_at(10, 0));

        assert_eq!(
            calc.check_slot(&doctor, monday_at(10, 15), None).unwrap(),
            SlotCheck::Taken {
                appointment_id: apt.appointment_id.clone()
            }
        );
        assert!(calc.is_available(&doctor, monday_at(10, 30)).unwrap());
        assert!(calc
            .check_slot(&doctor, monday_at(10, 15), Some(&apt.appointment_id))
            .unwrap()
            .is_available());
    }

    #[test]
    fn cancelled_booking_does_not_block() {
        let (store, calc, doctor) = setup();
        let mut apt = book(&store, &doctor, monday_at(10, 0));
        apt.status = AppointmentStatus::Cancelled;
        store
            .update_appointment(&apt, AppointmentStatus::Scheduled, Duration::minutes(30))
            .unwrap();
        assert!(calc.is_available(&doctor, monday_at(10, 0)).unwrap());
    }

    #[test]
    fn inactive_doctor_is_unavailable() {
        let (store, calc, doctor) = setup();
        store.set_user_active(&doctor, false).unwrap();
        assert_eq!(
            calc.check_slot(&doctor, monday_at(10, 0), None).unwrap(),
            SlotCheck::DoctorInactive
        );
    }

    #[test]
    fn lists_free_future_slots() {
        let (store, calc, doctor) = setup();
        book(&store, &doctor, monday_at(10, 0));
        let date = monday_at(0, 0).date();

        let slots = calc.available_slots(&doctor, date, monday_at(9, 0)).unwrap();
        let times: Vec<_> = slots.iter().map(|s| s.time()).collect();
        assert_eq!(times, vec![t(9, 30), t(10, 30), t(11, 0), t(11, 30)]);
    }
}
