//! Attendance writes and the per-doctor daily summary.

use std::{collections::BTreeMap, sync::Arc};

use chrono::NaiveDate;
use log::{debug, info};

use crate::clock::Clock;
use crate::error::{ClinicError, Result};
use crate::models::{Attendance, AttendanceSummary};
use crate::storage::ClinicStore;

/// Per-doctor summaries for one day, keyed by doctor id.
pub type DailySummary = BTreeMap<String, AttendanceSummary>;

#[derive(Clone)]
pub struct AttendanceRecorder {
    store: Arc<dyn ClinicStore>,
    clock: Arc<dyn Clock>,
}

impl AttendanceRecorder {
    pub fn new(store: Arc<dyn ClinicStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Write the single attendance row for (session, patient), replacing
    /// any earlier mark. The session must be in progress and belong to the
    /// patient.
    pub fn record(
        &self,
        session_id: &str,
        patient_id: &str,
        is_present: bool,
        notes: Option<String>,
    ) -> Result<Attendance> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| ClinicError::not_found("Session", session_id))?;
        session.ensure_in_progress()?;

        if session.patient_id != patient_id {
            return Err(ClinicError::ValidationFailed(format!(
                "Patient {} is not the patient of session {}",
                patient_id, session_id
            )));
        }

        let previous = self.store.get_attendance(session_id, patient_id)?;
        let attendance = Attendance {
            session_id: session_id.to_string(),
            patient_id: patient_id.to_string(),
            is_present,
            notes: notes.filter(|n| !n.trim().is_empty()),
            recorded_at: self.clock.now(),
        };
        self.store.upsert_attendance(&attendance)?;

        match previous {
            Some(old) if old.is_present != is_present => info!(
                "Attendance for session {} corrected: present {} -> {}",
                session_id, old.is_present, is_present
            ),
            _ => info!(
                "Attendance for session {} recorded: present={}",
                session_id, is_present
            ),
        }
        Ok(attendance)
    }

    pub fn get(&self, session_id: &str, patient_id: &str) -> Result<Option<Attendance>> {
        self.store.get_attendance(session_id, patient_id)
    }

    /// Count presences and absences for sessions started on `date`, grouped
    /// by the session's doctor. Doctors with nothing recorded are omitted.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let mut summaries = DailySummary::new();

        for session in self.store.get_sessions_started_on(date)? {
            for row in self.store.get_attendance_by_session(&session.session_id)? {
                summaries
                    .entry(session.doctor_id.clone())
                    .or_insert_with(|| AttendanceSummary::new(session.doctor_id.clone(), date))
                    .record(row.is_present);
            }
        }

        debug!(
            "Daily summary for {}: {} doctor(s)",
            date.format("%Y-%m-%d"),
            summaries.len()
        );
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{Appointment, Session, SessionStatus};
    use crate::storage::InMemoryStore;
    use chrono::{Duration, NaiveDateTime};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, d).unwrap()
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn started_session(store: &InMemoryStore, doctor: &str, patient: &str, start: NaiveDateTime) -> Session {
        let apt = Appointment::new(
            doctor.into(),
            patient.into(),
            start,
            None,
            start - Duration::days(1),
        )
        .unwrap();
        store.insert_appointment(&apt, Duration::minutes(30)).unwrap();
        let session = Session::start(&apt, start).unwrap();
        store.insert_session(&session).unwrap();
        session
    }

    fn recorder(store: &Arc<InMemoryStore>) -> AttendanceRecorder {
        AttendanceRecorder::new(store.clone(), Arc::new(FixedClock::new(at(7, 12))))
    }

    #[test]
    fn re_marking_overwrites_single_row() {
        let store = Arc::new(InMemoryStore::new());
        let session = started_session(&store, "doc", "pat", at(7, 10));
        let rec = recorder(&store);

        rec.record(&session.session_id, "pat", true, None).unwrap();
        rec.record(&session.session_id, "pat", false, Some("left early".into()))
            .unwrap();

        let rows = store.get_attendance_by_session(&session.session_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_present);
        assert_eq!(rows[0].notes.as_deref(), Some("left early"));
    }

    #[test]
    fn rejects_unknown_session_foreign_patient_and_ended_session() {
        let store = Arc::new(InMemoryStore::new());
        let session = started_session(&store, "doc", "pat", at(7, 10));
        let rec = recorder(&store);

        assert!(matches!(
            rec.record("missing", "pat", true, None),
            Err(ClinicError::NotFound { .. })
        ));
        assert!(matches!(
            rec.record(&session.session_id, "someone-else", true, None),
            Err(ClinicError::ValidationFailed(_))
        ));

        let mut ended = session.clone();
        ended.finish(SessionStatus::Completed, at(7, 11)).unwrap();
        store.update_session(&ended, SessionStatus::InProgress).unwrap();
        assert!(matches!(
            rec.record(&session.session_id, "pat", true, None),
            Err(ClinicError::InvalidState(_))
        ));
    }

    #[test]
    fn summary_groups_by_doctor_and_day() {
        let store = Arc::new(InMemoryStore::new());
        let rec = recorder(&store);

        let s1 = started_session(&store, "doc-a", "p1", at(7, 9));
        let s2 = started_session(&store, "doc-a", "p2", at(7, 11));
        let s3 = started_session(&store, "doc-b", "p3", at(7, 9));
        let other_day = started_session(&store, "doc-c", "p4", at(8, 9));
        started_session(&store, "doc-d", "p5", at(7, 14));

        rec.record(&s1.session_id, "p1", true, None).unwrap();
        rec.record(&s2.session_id, "p2", false, None).unwrap();
        rec.record(&s3.session_id, "p3", true, None).unwrap();
        rec.record(&other_day.session_id, "p4", true, None).unwrap();

        let summary = rec.daily_summary(day(7)).unwrap();
        assert_eq!(summary.len(), 2);

        let a = &summary["doc-a"];
        assert_eq!((a.total_patients, a.present_count, a.absent_count), (2, 1, 1));
        let b = &summary["doc-b"];
        assert_eq!((b.total_patients, b.present_count, b.absent_count), (1, 1, 0));
        assert!(!summary.contains_key("doc-c"));
        assert!(!summary.contains_key("doc-d"));

        for s in summary.values() {
            assert_eq!(s.total_patients, s.present_count + s.absent_count);
        }
        assert_eq!(rec.daily_summary(day(7)).unwrap(), summary);
    }

    #[test]
    fn empty_day_has_empty_summary() {
        let store = Arc::new(InMemoryStore::new());
        assert!(recorder(&store).daily_summary(day(9)).unwrap().is_empty());
    }
}
