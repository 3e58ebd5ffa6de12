/// Appointment booking, rescheduling and cancellation.
///
/// The `AppointmentBook` is the only writer of appointments. Every booking
/// re-checks availability at the moment of the write, and the store's
/// per-(doctor, slot) uniqueness constraint settles any remaining race.
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::availability::{AvailabilityCalculator, SlotCheck};
use crate::clock::Clock;
use crate::error::{ClinicError, Result};
use crate::models::{ensure_future, Appointment, AppointmentStatus};
use crate::storage::ClinicStore;

#[derive(Clone)]
pub struct AppointmentBook {
    store: Arc<dyn ClinicStore>,
    availability: AvailabilityCalculator,
    clock: Arc<dyn Clock>,
}

impl AppointmentBook {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        availability: AvailabilityCalculator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AppointmentBook {
            store,
            availability,
            clock,
        }
    }

    /// Turn a slot check into the booking error it implies.
    fn require_bookable(&self, check: SlotCheck, doctor_id: &str, at: NaiveDateTime) -> Result<()> {
        match check {
            SlotCheck::Available => Ok(()),
            SlotCheck::DoctorInactive => Err(ClinicError::ValidationFailed(format!(
                "Doctor {} is not accepting appointments",
                doctor_id
            ))),
            SlotCheck::OutsideSchedule => Err(ClinicError::ValidationFailed(format!(
                "Doctor {} is not available at {}",
                doctor_id,
                at.format("%a %Y-%m-%d %H:%M")
            ))),
            SlotCheck::Taken { appointment_id } => Err(ClinicError::Conflict(format!(
                "Doctor {} slot {} is already held by appointment {}",
                doctor_id,
                at.format("%Y-%m-%d %H:%M"),
                appointment_id
            ))),
        }
    }

    /// Book a new appointment and return its id.
    pub fn book(
        &self,
        doctor_id: &str,
        patient_id: &str,
        at: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<String> {
        let appointment = Appointment::new(
            doctor_id.to_string(),
            patient_id.to_string(),
            at,
            notes,
            self.clock.now(),
        )?;

        let check = self.availability.check_slot(doctor_id, at, None)?;
        if let Err(err) = self.require_bookable(check, doctor_id, at) {
            warn!("Booking rejected for doctor {doctor_id}: {err}");
            return Err(err);
        }

        if let Err(err) = self
            .store
            .insert_appointment(&appointment, self.availability.slot_length())
        {
            warn!("Booking lost a race for doctor {doctor_id}: {err}");
            return Err(err);
        }

        info!(
            "Appointment {} booked: doctor {} patient {} at {}",
            appointment.appointment_id,
            doctor_id,
            patient_id,
            at.format("%Y-%m-%d %H:%M")
        );
        Ok(appointment.appointment_id)
    }

    /// Cancel a scheduled appointment. Cancelling twice is a no-op.
    pub fn cancel(&self, appointment_id: &str) -> Result<()> {
        let mut appointment = self.get(appointment_id)?;

        match appointment.status {
            AppointmentStatus::Cancelled => {
                debug!("Appointment {appointment_id} already cancelled");
                return Ok(());
            }
            AppointmentStatus::Completed | AppointmentStatus::NoShow => {
                return Err(ClinicError::InvalidState(format!(
                    "Appointment {} is {} and cannot be cancelled",
                    appointment_id,
                    appointment.status.name()
                )));
            }
            AppointmentStatus::Scheduled => {}
        }

        if self.store.get_session_by_appointment(appointment_id)?.is_some() {
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} already has a session; end the session instead",
                appointment_id
            )));
        }

        appointment.status = AppointmentStatus::Cancelled;
        self.store.update_appointment(
            &appointment,
            AppointmentStatus::Scheduled,
            self.availability.slot_length(),
        )?;

        info!("Appointment {appointment_id} cancelled");
        Ok(())
    }

    /// Move a scheduled appointment to a new time.
    pub fn reschedule(&self, appointment_id: &str, new_time: NaiveDateTime) -> Result<Appointment> {
        let mut appointment = self.get(appointment_id)?;

        if appointment.status != AppointmentStatus::Scheduled {
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} is {} and cannot be rescheduled",
                appointment_id,
                appointment.status.name()
            )));
        }
        if self.store.get_session_by_appointment(appointment_id)?.is_some() {
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} already has a session",
                appointment_id
            )));
        }
        ensure_future(new_time, self.clock.now())?;

        let check =
            self.availability
                .check_slot(&appointment.doctor_id, new_time, Some(appointment_id))?;
        self.require_bookable(check, &appointment.doctor_id, new_time)?;

        let previous = appointment.scheduled_at;
        appointment.scheduled_at = new_time;
        self.store.update_appointment(
            &appointment,
            AppointmentStatus::Scheduled,
            self.availability.slot_length(),
        )?;

        info!(
            "Appointment {} rescheduled from {} to {}",
            appointment_id,
            previous.format("%Y-%m-%d %H:%M"),
            new_time.format("%Y-%m-%d %H:%M")
        );
        Ok(appointment)
    }

    /// Record the outcome of the session held for a scheduled appointment.
    pub(crate) fn close(&self, appointment_id: &str, outcome: AppointmentStatus) -> Result<()> {
        let mut appointment = self.get(appointment_id)?;
        if appointment.status == outcome {
            return Ok(());
        }
        if appointment.status.is_terminal() {
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} is already {}",
                appointment_id,
                appointment.status.name()
            )));
        }

        appointment.status = outcome;
        self.store.update_appointment(
            &appointment,
            AppointmentStatus::Scheduled,
            self.availability.slot_length(),
        )
    }

    pub fn get(&self, appointment_id: &str) -> Result<Appointment> {
        self.store
            .get_appointment(appointment_id)?
            .ok_or_else(|| ClinicError::not_found("Appointment", appointment_id))
    }

    pub fn for_doctor(&self, doctor_id: &str) -> Result<Vec<Appointment>> {
        self.store.get_appointments_by_doctor(doctor_id)
    }

    pub fn for_patient(&self, patient_id: &str) -> Result<Vec<Appointment>> {
        self.store.get_appointments_by_patient(patient_id)
    }

    /// Scheduled appointments that start after now.
    pub fn upcoming_for_doctor(&self, doctor_id: &str) -> Result<Vec<Appointment>> {
        let now = self.clock.now();
        Ok(self
            .for_doctor(doctor_id)?
            .into_iter()
            .filter(|a| a.status == AppointmentStatus::Scheduled && a.scheduled_at > now)
            .collect())
    }

    pub fn upcoming_for_patient(&self, patient_id: &str) -> Result<Vec<Appointment>> {
        let now = self.clock.now();
        Ok(self
            .for_patient(patient_id)?
            .into_iter()
            .filter(|a| a.status == AppointmentStatus::Scheduled && a.scheduled_at > now)
            .collect())
    }
}
