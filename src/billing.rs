//! Bills and payments attached to finished sessions.
//!
//! `is_paid` on a bill is an explicit one-way gate set by `mark_paid`.
//! Recorded payments are kept alongside but never flip the flag.

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{info, warn};

use crate::clock::Clock;
use crate::error::{ClinicError, Result};
use crate::models::{Bill, Payment, PaymentMethod, PaymentStatus, SessionStatus};
use crate::storage::ClinicStore;

#[derive(Clone)]
pub struct BillingGate {
    store: Arc<dyn ClinicStore>,
    clock: Arc<dyn Clock>,
}

impl BillingGate {
    pub fn new(store: Arc<dyn ClinicStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Raise the bill for a completed session. One bill per session.
    pub fn create_bill(&self, session_id: &str, amount: f64) -> Result<Bill> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| ClinicError::not_found("Session", session_id))?;

        if session.status != SessionStatus::Completed {
            return Err(ClinicError::InvalidState(format!(
                "Session {} is {}, only completed sessions can be billed",
                session_id,
                session.status.name()
            )));
        }

        let bill = Bill::new(session_id.to_string(), amount, self.clock.now().date())?;
        self.store.insert_bill(&bill)?;

        info!(
            "Bill {} raised for session {}: {:.2}",
            bill.bill_id, session_id, amount
        );
        Ok(bill)
    }

    /// Mark an unpaid bill as paid. A second call is rejected.
    pub fn mark_paid(&self, bill_id: &str) -> Result<bool> {
        let mut bill = self.get(bill_id)?;

        if bill.is_paid {
            warn!("Bill {bill_id} is already paid");
            return Err(ClinicError::InvalidState(format!(
                "Bill {} is already paid",
                bill_id
            )));
        }

        bill.is_paid = true;
        self.store.update_bill(&bill, false)?;

        info!("Bill {bill_id} marked as paid");
        Ok(true)
    }

    /// Record an installment against a bill.
    pub fn record_payment(
        &self,
        bill_id: &str,
        amount: f64,
        method: PaymentMethod,
    ) -> Result<Payment> {
        let bill = self.get(bill_id)?;
        let payment = Payment::new(bill.bill_id, amount, method, self.clock.now())?;
        self.store.insert_payment(&payment)?;

        info!(
            "Payment {} of {:.2} recorded against bill {} ({:?})",
            payment.payment_id, amount, bill_id, method
        );
        Ok(payment)
    }

    pub fn payment_status(&self, bill_id: &str) -> Result<PaymentStatus> {
        self.store
            .get_payment_status_by_bill(bill_id)?
            .ok_or_else(|| ClinicError::not_found("Bill", bill_id))
    }

    pub fn get(&self, bill_id: &str) -> Result<Bill> {
        self.store
            .get_bill(bill_id)?
            .ok_or_else(|| ClinicError::not_found("Bill", bill_id))
    }

    pub fn unpaid_bills_for_patient(&self, patient_id: &str) -> Result<Vec<Bill>> {
        self.store.get_unpaid_bills_by_patient(patient_id)
    }

    pub fn payments_for_patient(&self, patient_id: &str) -> Result<Vec<Payment>> {
        self.store.get_payments_by_patient(patient_id)
    }

    pub fn payments_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> Result<Vec<Payment>> {
        if to < from {
            return Err(ClinicError::ValidationFailed(format!(
                "Range end {} precedes start {}",
                to.format("%Y-%m-%d %H:%M"),
                from.format("%Y-%m-%d %H:%M")
            )));
        }
        self.store.get_payments_by_date_range(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{Appointment, Session};
    use crate::storage::InMemoryStore;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn session_with_status(store: &InMemoryStore, status: SessionStatus) -> Session {
        let apt = Appointment::new("doc".into(), "pat".into(), at(10), None, at(6)).unwrap();
        store.insert_appointment(&apt, Duration::minutes(30)).unwrap();
        let mut session = Session::start(&apt, at(10)).unwrap();
        store.insert_session(&session).unwrap();
        if status != SessionStatus::InProgress {
            session.finish(status, at(11)).unwrap();
            store.update_session(&session, SessionStatus::InProgress).unwrap();
        }
        session
    }

    fn gate(store: &Arc<InMemoryStore>) -> BillingGate {
        BillingGate::new(store.clone(), Arc::new(FixedClock::new(at(12))))
    }

    #[test]
    fn only_completed_sessions_are_billable() {
        let store = Arc::new(InMemoryStore::new());
        let gate = gate(&store);
        let running = session_with_status(&store, SessionStatus::InProgress);
        assert!(matches!(
            gate.create_bill(&running.session_id, 50.0),
            Err(ClinicError::InvalidState(_))
        ));
        assert!(matches!(
            gate.create_bill("missing", 50.0),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn bill_amount_and_uniqueness() {
        let store = Arc::new(InMemoryStore::new());
        let gate = gate(&store);
        let done = session_with_status(&store, SessionStatus::Completed);

        assert!(matches!(
            gate.create_bill(&done.session_id, -5.0),
            Err(ClinicError::ValidationFailed(_))
        ));
        let bill = gate.create_bill(&done.session_id, 80.0).unwrap();
        assert!(!bill.is_paid);
        assert_eq!(bill.date, at(12).date());
        assert!(matches!(
            gate.create_bill(&done.session_id, 80.0),
            Err(ClinicError::Conflict(_))
        ));
    }

    #[test]
    fn mark_paid_is_a_one_way_gate() {
        let store = Arc::new(InMemoryStore::new());
        let gate = gate(&store);
        let done = session_with_status(&store, SessionStatus::Completed);
        let bill = gate.create_bill(&done.session_id, 80.0).unwrap();

        assert!(gate.mark_paid(&bill.bill_id).unwrap());
        assert!(matches!(
            gate.mark_paid(&bill.bill_id),
            Err(ClinicError::InvalidState(_))
        ));
        assert!(matches!(
            gate.mark_paid("missing"),
            Err(ClinicError::NotFound { .. })
        ));
    }

    #[test]
    fn payments_never_flip_the_paid_flag() {
        let store = Arc::new(InMemoryStore::new());
        let gate = gate(&store);
        let done = session_with_status(&store, SessionStatus::Completed);
        let bill = gate.create_bill(&done.session_id, 80.0).unwrap();

        gate.record_payment(&bill.bill_id, 50.0, PaymentMethod::Cash).unwrap();
        gate.record_payment(&bill.bill_id, 30.0, PaymentMethod::Card).unwrap();

        let status = gate.payment_status(&bill.bill_id).unwrap();
        assert_eq!(status.total_paid, 80.0);
        assert_eq!(status.outstanding, 0.0);
        assert_eq!(status.payment_count, 2);
        assert!(!status.is_paid);
        assert_eq!(gate.unpaid_bills_for_patient("pat").unwrap().len(), 1);

        gate.mark_paid(&bill.bill_id).unwrap();
        assert!(gate.unpaid_bills_for_patient("pat").unwrap().is_empty());
        assert_eq!(gate.payments_for_patient("pat").unwrap().len(), 2);
    }

    #[test]
    fn payment_validation_and_ranges() {
        let store = Arc::new(InMemoryStore::new());
        let gate = gate(&store);
        let done = session_with_status(&store, SessionStatus::Completed);
        let bill = gate.create_bill(&done.session_id, 80.0).unwrap();

        assert!(matches!(
            gate.record_payment(&bill.bill_id, 0.0, PaymentMethod::Cash),
            Err(ClinicError::ValidationFailed(_))
        ));
        assert!(matches!(
            gate.record_payment("missing", 10.0, PaymentMethod::Cash),
            Err(ClinicError::NotFound { .. })
        ));

        gate.record_payment(&bill.bill_id, 10.0, PaymentMethod::Insurance)
            .unwrap();
        assert_eq!(gate.payments_between(at(12), at(13)).unwrap().len(), 1);
        assert!(gate.payments_between(at(13), at(14)).unwrap().is_empty());
        assert!(matches!(
            gate.payments_between(at(13), at(12)),
            Err(ClinicError::ValidationFailed(_))
        ));
    }
}
